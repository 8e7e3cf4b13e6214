//! HTML-to-record extraction for gas station listing pages.
//!
//! The page layout contract is fixed: repeating `.gas_block_1` station
//! blocks, each with a title, a location paragraph carrying coordinates,
//! and a `.gas_inf` container holding exactly three `.fuel` price elements
//! (gas, diesel, LPG in that order) plus an optional `.last_upd_fuel`
//! label. Field-level oddities fail soft; structural mismatches abort the
//! whole page so layout drift is visible instead of silently eating data.

use chrono::{NaiveDate, NaiveDateTime};
use gasprices_core::StationRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

pub const CRATE_NAME: &str = "gasprices-scrape";

/// Marker the source uses for fuels a station does not sell.
const NO_DATA_MARKER: &str = "---";

static PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*").expect("price regex"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{4})").expect("date regex"));
static COORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d{1,3}\.\d{1,6}").expect("coordinate regex"));

/// How station block titles are interpreted.
///
/// Some page variants title blocks as `Brand / Station name`, others carry
/// only the station name. This is a configuration switch rather than a
/// hard-coded assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleMode {
    /// Split the title on the first `/` into (brand, name). A title with
    /// no separator still yields a name-only record.
    #[default]
    SplitBrand,
    /// Treat the whole title as the station name; brand stays absent.
    WholeName,
}

/// Page-level structural violation: the fetched page no longer matches the
/// layout contract. Carries the block index so operators can locate drift.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
    #[error("station block {block}: missing required {what}")]
    MissingStructure { block: usize, what: &'static str },
    #[error("station block {block}: expected 3 fuel price elements, found {found}")]
    FuelElementCount { block: usize, found: usize },
}

/// Extracts the first decimal-comma number from a price fragment.
///
/// Absent input, the no-data marker, and digit-free text all yield `None`;
/// surrounding currency symbols and labels are ignored. Normalization of
/// the `,` fractional separator is explicit and independent of the host
/// locale.
pub fn parse_price(value: Option<&str>) -> Option<f64> {
    let value = value?;
    if value.contains(NO_DATA_MARKER) {
        return None;
    }
    let run = PRICE_RE.find(value)?.as_str().replace(',', ".");
    run.parse::<f64>().ok().filter(|v| *v >= 0.0)
}

/// Finds a `D.M.YYYY`-shaped substring and parses it as midnight of that
/// calendar date. No date-shaped substring, or a substring that is not a
/// valid calendar date, yields `None`.
pub fn parse_date(value: Option<&str>) -> Option<NaiveDateTime> {
    let caps = DATE_RE.captures(value?)?;
    let day = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let year = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)
}

/// Extracts a `(lat, lon)` pair from free text.
///
/// Exactly two coordinate-shaped tokens are required; any other count
/// falls back to `(0.0, 0.0)` so one malformed location never aborts a
/// whole-page parse.
pub fn parse_coordinates(value: Option<&str>) -> (f64, f64) {
    let Some(value) = value else {
        return (0.0, 0.0);
    };
    let tokens: Vec<f64> = COORD_RE
        .find_iter(value)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    match tokens.as_slice() {
        [lat, lon] => (*lat, *lon),
        _ => (0.0, 0.0),
    }
}

fn selector(input: &'static str) -> Result<Selector, ExtractError> {
    Selector::parse(input).map_err(|e| ExtractError::Selector {
        selector: input.to_string(),
        message: e.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

fn required<'a>(
    block: ElementRef<'a>,
    sel: &Selector,
    index: usize,
    what: &'static str,
) -> Result<ElementRef<'a>, ExtractError> {
    block
        .select(sel)
        .next()
        .ok_or(ExtractError::MissingStructure { block: index, what })
}

fn split_title(title: &str, mode: TitleMode) -> (Option<String>, String) {
    match mode {
        TitleMode::WholeName => (None, title.trim().to_string()),
        TitleMode::SplitBrand => match title.split_once('/') {
            Some((brand, name)) => (Some(brand.trim().to_string()), name.trim().to_string()),
            None => (None, title.trim().to_string()),
        },
    }
}

/// Walks one fetched page body and emits zero or more normalized records.
///
/// Pure transform: no I/O, no logging. Records failing the persistence
/// policy (no prices at all, or no parseable last-updated date) are
/// silently dropped; structural mismatches abort the page with an error.
pub fn extract_records(body: &str, mode: TitleMode) -> Result<Vec<StationRecord>, ExtractError> {
    let block_sel = selector(".gas_block_1")?;
    let title_sel = selector("h2")?;
    let city_sel = selector("p a")?;
    let latlon_sel = selector("p")?;
    let prices_sel = selector(".gas_inf")?;
    let fuel_sel = selector(".fuel")?;
    let last_upd_sel = selector(".last_upd_fuel")?;

    let document = Html::parse_document(body);
    let mut records = Vec::new();

    for (index, block) in document.select(&block_sel).enumerate() {
        let title = required(block, &title_sel, index, "title element")?;
        let city = required(block, &city_sel, index, "location link")?;
        let latlon_holder = required(block, &latlon_sel, index, "coordinate paragraph")?;
        let prices_node = required(block, &prices_sel, index, "prices container")?;

        let fuel_nodes: Vec<ElementRef<'_>> = prices_node.select(&fuel_sel).collect();
        if fuel_nodes.len() != 3 {
            return Err(ExtractError::FuelElementCount {
                block: index,
                found: fuel_nodes.len(),
            });
        }

        let (station, name) = split_title(&element_text(title), mode);
        let gas = parse_price(Some(&element_text(fuel_nodes[0])));
        let diesel = parse_price(Some(&element_text(fuel_nodes[1])));
        let lpg = parse_price(Some(&element_text(fuel_nodes[2])));
        let (lat, lon) = parse_coordinates(Some(&element_text(latlon_holder)));
        let last_updated = prices_node
            .select(&last_upd_sel)
            .next()
            .and_then(|n| parse_date(Some(&element_text(n))));

        let record = StationRecord {
            station,
            name,
            gas,
            diesel,
            lpg,
            last_updated,
            location: element_text(city).trim().to_string(),
            lat,
            lon,
        };

        if record.is_persistable() {
            records.push(record);
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station_block(title: &str, prices: [&str; 3], location: &str, updated: &str) -> String {
        format!(
            r##"<div class="gas_block_1">
                 <h2>{title}</h2>
                 <p><a href="#">{location}</a> 48.7 17.3</p>
                 <div class="gas_inf">
                   <span class="fuel">{}</span>
                   <span class="fuel">{}</span>
                   <span class="fuel">{}</span>
                   <span class="last_upd_fuel">{updated}</span>
                 </div>
               </div>"##,
            prices[0], prices[1], prices[2],
        )
    }

    #[test]
    fn price_parses_decimal_comma_with_surrounding_text() {
        assert_eq!(parse_price(Some("1,459 €")), Some(1.459));
        assert_eq!(parse_price(Some("cena: 1,399 € / l")), Some(1.399));
    }

    #[test]
    fn price_no_data_marker_and_missing_digits_are_absent() {
        assert_eq!(parse_price(Some("---")), None);
        assert_eq!(parse_price(Some("  --- ")), None);
        assert_eq!(parse_price(Some("no price here")), None);
        assert_eq!(parse_price(None), None);
    }

    #[test]
    fn date_found_inside_label_text() {
        let parsed = parse_date(Some("aktualizované 3.11.2024")).unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2024, 11, 3)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn date_shaped_but_invalid_calendar_date_is_absent() {
        assert_eq!(parse_date(Some("31.2.2024")), None);
    }

    #[test]
    fn date_missing_is_absent() {
        assert_eq!(parse_date(Some("aktualizované dnes")), None);
        assert_eq!(parse_date(None), None);
    }

    #[test]
    fn coordinates_require_exactly_two_tokens() {
        assert_eq!(parse_coordinates(Some("City, 48.7 17.3")), (48.7, 17.3));
        assert_eq!(parse_coordinates(Some("-33.8688 151.2093")), (-33.8688, 151.2093));
        assert_eq!(parse_coordinates(Some("48.7")), (0.0, 0.0));
        assert_eq!(parse_coordinates(Some("48.7 17.3 99.9")), (0.0, 0.0));
        assert_eq!(parse_coordinates(None), (0.0, 0.0));
    }

    #[test]
    fn end_to_end_single_block() {
        let html = station_block(
            "BrandX / Station A",
            ["1,459 €", "1,399 €", "---"],
            "City",
            "aktualizované 3.11.2024",
        );
        let records = extract_records(&html, TitleMode::SplitBrand).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.station.as_deref(), Some("BrandX"));
        assert_eq!(r.name, "Station A");
        assert_eq!(r.gas, Some(1.459));
        assert_eq!(r.diesel, Some(1.399));
        assert_eq!(r.lpg, None);
        assert_eq!(
            r.last_updated,
            NaiveDate::from_ymd_opt(2024, 11, 3).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(r.location, "City");
        assert_eq!((r.lat, r.lon), (48.7, 17.3));
    }

    #[test]
    fn block_with_no_prices_is_dropped() {
        let html = station_block(
            "BrandX / Station A",
            ["---", "---", "---"],
            "City",
            "aktualizované 3.11.2024",
        );
        let records = extract_records(&html, TitleMode::SplitBrand).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn block_without_parseable_date_is_dropped() {
        let html = station_block(
            "BrandX / Station A",
            ["1,459 €", "---", "---"],
            "City",
            "aktualizované dnes",
        );
        let records = extract_records(&html, TitleMode::SplitBrand).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn title_without_separator_keeps_whole_name_and_no_brand() {
        let html = station_block(
            "Station A",
            ["1,459 €", "---", "---"],
            "City",
            "3.11.2024",
        );
        let records = extract_records(&html, TitleMode::SplitBrand).unwrap();
        assert_eq!(records[0].station, None);
        assert_eq!(records[0].name, "Station A");
    }

    #[test]
    fn whole_name_mode_never_splits() {
        let html = station_block(
            "BrandX / Station A",
            ["1,459 €", "---", "---"],
            "City",
            "3.11.2024",
        );
        let records = extract_records(&html, TitleMode::WholeName).unwrap();
        assert_eq!(records[0].station, None);
        assert_eq!(records[0].name, "BrandX / Station A");
    }

    #[test]
    fn missing_title_is_a_page_level_error() {
        let html = r##"<div class="gas_block_1">
                        <p><a href="#">City</a> 48.7 17.3</p>
                        <div class="gas_inf">
                          <span class="fuel">1,459 €</span>
                          <span class="fuel">---</span>
                          <span class="fuel">---</span>
                        </div>
                      </div>"##;
        let err = extract_records(html, TitleMode::SplitBrand).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::MissingStructure { block: 0, what: "title element" }
        ));
    }

    #[test]
    fn wrong_fuel_element_count_is_a_page_level_error() {
        let html = r##"<div class="gas_block_1">
                        <h2>BrandX / Station A</h2>
                        <p><a href="#">City</a> 48.7 17.3</p>
                        <div class="gas_inf">
                          <span class="fuel">1,459 €</span>
                          <span class="fuel">1,399 €</span>
                        </div>
                      </div>"##;
        let err = extract_records(html, TitleMode::SplitBrand).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::FuelElementCount { block: 0, found: 2 }
        ));
    }

    #[test]
    fn later_malformed_block_aborts_page_after_valid_block() {
        let good = station_block(
            "BrandX / Station A",
            ["1,459 €", "---", "---"],
            "City",
            "3.11.2024",
        );
        let bad = r#"<div class="gas_block_1"><h2>Broken</h2></div>"#;
        let html = format!("{good}{bad}");
        assert!(extract_records(&html, TitleMode::SplitBrand).is_err());
    }

    #[test]
    fn empty_page_yields_no_records() {
        let records = extract_records("<html><body></body></html>", TitleMode::SplitBrand).unwrap();
        assert!(records.is_empty());
    }
}

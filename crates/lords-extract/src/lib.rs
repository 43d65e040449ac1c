//! Heuristic record extraction from rendered wiki page HTML.
//!
//! Infobox fields come from a ranked chain of passes (portable infobox,
//! classic `th`/`td` table, page heading); each pass only fills fields the
//! earlier ones left unset. Traits come from the first "trait" section and
//! skills from every table whose headers mention a skill or a value. Missing
//! structure never fails extraction: a field just stays unset.

use std::collections::HashSet;

use lords_core::{fill, normalize_skill_key, ExtractedPage, InfoboxFields, SkillMap};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

pub const CRATE_NAME: &str = "lords-extract";

/// Paragraphs at or above this many words are prose, not a trait listing.
pub const TRAIT_PARAGRAPH_MAX_WORDS: usize = 10;

const TRAIT_TRIM_CHARS: [char; 5] = [' ', '•', ';', ',', '-'];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

type InfoboxPass = fn(&Extractor, &Html, &mut InfoboxFields);

/// Tried in order; later passes never overwrite a field an earlier one set.
const INFOBOX_PASSES: [InfoboxPass; 3] = [
    Extractor::portable_infobox_pass,
    Extractor::classic_table_pass,
    Extractor::heading_pass,
];

/// Compiled selectors and patterns, built once per pipeline run.
#[derive(Debug)]
pub struct Extractor {
    first_heading: Selector,
    h1: Selector,
    portable_infobox: Selector,
    classic_infobox: Selector,
    data_source: Selector,
    data_value: Selector,
    table: Selector,
    row: Selector,
    header_cell: Selector,
    data_cell: Selector,
    any_cell: Selector,
    list_item: Selector,
    unsigned_number: Regex,
    signed_number: Regex,
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

/// Stripped text nodes joined by single spaces.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn text_or_none(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Extractor {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            first_heading: selector("#firstHeading")?,
            h1: selector("h1")?,
            portable_infobox: selector(".portable-infobox")?,
            classic_infobox: selector("table.infobox")?,
            data_source: selector("[data-source]")?,
            data_value: selector(".pi-data-value")?,
            table: selector("table")?,
            row: selector("tr")?,
            header_cell: selector("th")?,
            data_cell: selector("td")?,
            any_cell: selector("td, th")?,
            list_item: selector("li")?,
            unsigned_number: Regex::new(r"\d+")?,
            signed_number: Regex::new(r"-?\d+")?,
        })
    }

    pub fn extract(&self, html: &str) -> ExtractedPage {
        let document = Html::parse_document(html);
        ExtractedPage {
            infobox: self.extract_infobox(&document),
            traits: self.extract_traits(&document),
            skills: self.extract_skills(&document),
        }
    }

    pub fn extract_infobox(&self, document: &Html) -> InfoboxFields {
        let mut fields = InfoboxFields::default();
        for pass in INFOBOX_PASSES {
            if fields.is_complete() {
                break;
            }
            pass(self, document, &mut fields);
        }
        fields
    }

    fn page_heading(&self, document: &Html) -> Option<String> {
        document
            .select(&self.first_heading)
            .next()
            .or_else(|| document.select(&self.h1).next())
            .and_then(|h| text_or_none(element_text(h)))
    }

    fn first_unsigned(&self, text: &str) -> Option<i64> {
        self.unsigned_number
            .find(text)
            .map(|m| saturating_integer(m.as_str()))
    }

    fn first_signed(&self, text: &str) -> Option<i64> {
        self.signed_number
            .find(text)
            .map(|m| saturating_integer(m.as_str()))
    }

    fn portable_infobox_pass(&self, document: &Html, fields: &mut InfoboxFields) {
        let Some(infobox) = document.select(&self.portable_infobox).next() else {
            return;
        };
        // The page heading beats any name item inside the box.
        fill(&mut fields.name, self.page_heading(document));

        for item in infobox.select(&self.data_source) {
            let label = item
                .value()
                .attr("data-source")
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            let value = item
                .select(&self.data_value)
                .next()
                .map(element_text)
                .unwrap_or_else(|| element_text(item));
            if value.is_empty() {
                continue;
            }
            match label.as_str() {
                "age" => fill(&mut fields.age, self.first_unsigned(&value)),
                "level" => fill(&mut fields.level, self.first_unsigned(&value)),
                "gender" | "sex" => fill(&mut fields.gender, Some(value)),
                _ => {}
            }
        }
    }

    fn classic_table_pass(&self, document: &Html, fields: &mut InfoboxFields) {
        let containers = document
            .select(&self.portable_infobox)
            .take(1)
            .chain(document.select(&self.classic_infobox).take(1))
            .collect::<Vec<_>>();
        if containers.is_empty() {
            return;
        }
        fill(&mut fields.name, self.page_heading(document));

        for container in containers {
            for row in container.select(&self.row) {
                let (Some(th), Some(td)) = (
                    row.select(&self.header_cell).next(),
                    row.select(&self.data_cell).next(),
                ) else {
                    continue;
                };
                let label = element_text(th).to_lowercase();
                let value = element_text(td);

                if label.contains("age") && fields.age.is_none() {
                    fields.age = self.first_unsigned(&value);
                } else if label.contains("gender") && fields.gender.is_none() {
                    fields.gender = text_or_none(value);
                } else if label.contains("level") && fields.level.is_none() {
                    fields.level = self.first_unsigned(&value);
                }
            }
        }
    }

    fn heading_pass(&self, document: &Html, fields: &mut InfoboxFields) {
        fill(&mut fields.name, self.page_heading(document));
    }

    /// Items under the first heading mentioning "trait", up to the next h2/h3.
    pub fn extract_traits(&self, document: &Html) -> Vec<String> {
        let elements = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .collect::<Vec<_>>();

        let Some(start) = elements.iter().position(|el| {
            matches!(el.value().name(), "h2" | "h3" | "h4")
                && element_text(*el).to_lowercase().contains("trait")
        }) else {
            return Vec::new();
        };

        let mut raw = Vec::new();
        for el in &elements[start + 1..] {
            match el.value().name() {
                "h2" | "h3" => break,
                "ul" | "ol" => raw.extend(
                    el.select(&self.list_item)
                        .map(element_text)
                        .filter(|t| !t.is_empty()),
                ),
                "p" => {
                    let text = element_text(*el);
                    let words = text.split_whitespace().count();
                    if words > 0 && words < TRAIT_PARAGRAPH_MAX_WORDS {
                        raw.push(text);
                    }
                }
                _ => {}
            }
        }
        clean_traits(raw)
    }

    /// Last write wins when several tables carry the same key.
    pub fn extract_skills(&self, document: &Html) -> SkillMap {
        let mut skills = SkillMap::new();
        for table in document.select(&self.table) {
            let is_skill_table = table
                .select(&self.header_cell)
                .map(|th| element_text(th).to_lowercase())
                .any(|h| h.contains("skill") || h.contains("value"));
            if !is_skill_table {
                continue;
            }

            for row in table.select(&self.row) {
                let cells = row.select(&self.any_cell).collect::<Vec<_>>();
                if cells.len() < 2 {
                    continue;
                }
                let raw_key = element_text(cells[0]);
                if raw_key.is_empty() {
                    continue;
                }
                let key = normalize_skill_key(&raw_key);
                if matches!(key.as_str(), "skill" | "name") {
                    continue;
                }
                let value = self.first_signed(&element_text(cells[1]));
                skills.insert(key, value);
            }
        }
        skills
    }
}

/// Digit runs past the `i64` range clamp to its bounds instead of reading as unset.
fn saturating_integer(digits: &str) -> i64 {
    digits.parse().unwrap_or(if digits.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Collapse whitespace, trim bullets/punctuation, dedupe keeping first-seen order.
pub fn clean_traits(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|t| {
            t.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .trim_matches(TRAIT_TRIM_CHARS.as_slice())
                .to_string()
        })
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// One-shot extraction for callers that do not keep an [`Extractor`] around.
pub fn extract(html: &str) -> Result<ExtractedPage, ExtractError> {
    Ok(Extractor::new()?.extract(html))
}

//! Core domain model and staging row contracts for the lords dataset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "lords-core";

/// Replaces whitespace in page titles when deriving the natural key.
pub const EXT_ID_SEPARATOR: char = '_';

/// Skill key -> parsed value. Ordered so staging output is reproducible.
pub type SkillMap = BTreeMap<String, Option<i64>>;

/// Natural key for a wiki page title, stable across runs.
pub fn ext_id_for_title(title: &str) -> String {
    title
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { EXT_ID_SEPARATOR } else { c })
        .collect()
}

pub fn source_url_for(wiki_base: &str, ext_id: &str) -> String {
    format!("{}/{}", wiki_base.trim_end_matches('/'), ext_id)
}

/// Lowercase, trimmed, whitespace runs joined with `_`.
pub fn normalize_skill_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Partial infobox record. Each extractor pass only fills fields still unset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfoboxFields {
    pub name: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub level: Option<i64>,
}

impl InfoboxFields {
    /// First non-null wins per field.
    pub fn fill_unset(&mut self, other: InfoboxFields) {
        fill(&mut self.name, other.name);
        fill(&mut self.age, other.age);
        fill(&mut self.gender, other.gender);
        fill(&mut self.level, other.level);
    }

    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.age.is_some() && self.gender.is_some() && self.level.is_some()
    }
}

pub fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Everything the extractor recovers from one rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub infobox: InfoboxFields,
    pub traits: Vec<String>,
    pub skills: SkillMap,
}

/// One character record, keyed by `ext_id`. Integer ids only exist after import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lord {
    pub ext_id: String,
    pub name: String,
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub level: Option<i64>,
    pub traits: Vec<String>,
    pub skills: SkillMap,
    pub source_url: String,
    pub clan_id: Option<i64>,
    pub culture_id: Option<i64>,
    pub sp_per_lvl: Option<i64>,
    pub sum_stats: Option<i64>,
}

impl Lord {
    pub fn from_page(title: &str, wiki_base: &str, page: ExtractedPage) -> Self {
        let ext_id = ext_id_for_title(title);
        let source_url = source_url_for(wiki_base, &ext_id);
        let name = page
            .infobox
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| title.trim().to_string());
        Self {
            ext_id,
            name,
            gender: page.infobox.gender,
            age: page.infobox.age,
            level: page.infobox.level,
            traits: page.traits,
            skills: page.skills,
            source_url,
            clan_id: None,
            culture_id: None,
            sp_per_lvl: None,
            sum_stats: None,
        }
    }

    /// Denormalized copy of the trait list kept on the entity row.
    pub fn traits_joined(&self) -> Option<String> {
        if self.traits.is_empty() {
            None
        } else {
            Some(self.traits.join("; "))
        }
    }

    pub fn to_row(&self) -> LordRow {
        LordRow {
            ext_id: self.ext_id.clone(),
            name: self.name.clone(),
            gender: self.gender.clone(),
            age: self.age,
            culture_id: self.culture_id,
            level: self.level,
            sp_per_lvl: self.sp_per_lvl,
            sum_stats: self.sum_stats,
            traits: self.traits_joined(),
            source_url: self.source_url.clone(),
        }
    }

    pub fn trait_rows(&self) -> Vec<LordTraitRow> {
        self.traits
            .iter()
            .map(|t| LordTraitRow {
                ext_id: self.ext_id.clone(),
                trait_text: t.clone(),
            })
            .collect()
    }

    pub fn skill_rows(&self) -> Vec<LordSkillRow> {
        self.skills
            .iter()
            .map(|(key, value)| LordSkillRow {
                ext_id: self.ext_id.clone(),
                skill_key: key.clone(),
                value: *value,
            })
            .collect()
    }
}

/// `lords.csv` row. Unset optionals travel as empty fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LordRow {
    pub ext_id: String,
    pub name: String,
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub culture_id: Option<i64>,
    pub level: Option<i64>,
    pub sp_per_lvl: Option<i64>,
    pub sum_stats: Option<i64>,
    pub traits: Option<String>,
    pub source_url: String,
}

impl LordRow {
    pub const HEADERS: [&'static str; 10] = [
        "ext_id",
        "name",
        "gender",
        "age",
        "culture_id",
        "level",
        "sp_per_lvl",
        "sum_stats",
        "traits",
        "source_url",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LordTraitRow {
    pub ext_id: String,
    #[serde(rename = "trait")]
    pub trait_text: String,
}

impl LordTraitRow {
    pub const HEADERS: [&'static str; 2] = ["ext_id", "trait"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LordSkillRow {
    pub ext_id: String,
    pub skill_key: String,
    pub value: Option<i64>,
}

impl LordSkillRow {
    pub const HEADERS: [&'static str; 3] = ["ext_id", "skill_key", "value"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ext_id_replaces_whitespace() {
        assert_eq!(ext_id_for_title("Caladog of Battania"), "Caladog_of_Battania");
        assert_eq!(ext_id_for_title("  Derthert "), "Derthert");
    }

    #[test]
    fn source_url_joins_without_double_slash() {
        assert_eq!(
            source_url_for("https://bannerlord.fandom.com/wiki/", "Derthert"),
            "https://bannerlord.fandom.com/wiki/Derthert"
        );
    }

    #[test]
    fn skill_keys_are_snake_cased() {
        assert_eq!(normalize_skill_key("  One Handed "), "one_handed");
        assert_eq!(normalize_skill_key("Riding"), "riding");
    }

    #[test]
    fn fill_unset_never_overwrites() {
        let mut fields = InfoboxFields {
            level: Some(5),
            ..Default::default()
        };
        fields.fill_unset(InfoboxFields {
            name: None,
            age: Some(34),
            gender: Some("Male".into()),
            level: Some(9),
        });
        assert_eq!(fields.level, Some(5));
        assert_eq!(fields.age, Some(34));
        assert_eq!(fields.gender.as_deref(), Some("Male"));
        assert!(!fields.is_complete());
    }

    #[test]
    fn lord_falls_back_to_title_and_keeps_reserved_fields_null() {
        let lord = Lord::from_page(
            "Arina of Sturgia",
            "https://bannerlord.fandom.com/wiki",
            ExtractedPage::default(),
        );
        assert_eq!(lord.name, "Arina of Sturgia");
        assert_eq!(lord.source_url, "https://bannerlord.fandom.com/wiki/Arina_of_Sturgia");

        let row = lord.to_row();
        assert_eq!(row.age, None);
        assert_eq!(row.gender, None);
        assert_eq!(row.traits, None);
        assert_eq!(row.culture_id, None);
        assert_eq!(row.sp_per_lvl, None);
        assert!(lord.trait_rows().is_empty());
    }

    #[test]
    fn rows_carry_traits_and_skills() {
        let mut page = ExtractedPage::default();
        page.traits = vec!["Brave".into(), "Calm".into()];
        page.skills.insert("riding".into(), Some(120));
        page.skills.insert("tactics".into(), None);
        let lord = Lord::from_page("Derthert", "https://w/wiki", page);

        assert_eq!(lord.to_row().traits.as_deref(), Some("Brave; Calm"));
        assert_eq!(lord.trait_rows()[1].trait_text, "Calm");
        let skills = lord.skill_rows();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].skill_key, "riding");
        assert_eq!(skills[1].value, None);
    }
}

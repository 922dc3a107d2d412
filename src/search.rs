use std::fmt;

use serde::{Deserialize, Serialize};

use crate::listing::ListingType;

pub const RADIUS_CHOICES: [u32; 4] = [10, 25, 50, 100];
pub const DEFAULT_RADIUS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    Recommended,
    Reputation,
    MostRecent,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Recommended => "recommended",
            SortBy::Reputation => "reputation",
            SortBy::MostRecent => "most-recent",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortBy::Recommended => "Recommended",
            SortBy::Reputation => "Reputation",
            SortBy::MostRecent => "Most recent",
        }
    }

    pub fn next(&self) -> SortBy {
        match self {
            SortBy::Recommended => SortBy::Reputation,
            SortBy::Reputation => SortBy::MostRecent,
            SortBy::MostRecent => SortBy::Recommended,
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub type_filters: Vec<ListingType>,
    pub radius_miles: u32,
    pub sort: SortBy,
    pub location: String,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            type_filters: ListingType::ALL.to_vec(),
            radius_miles: DEFAULT_RADIUS,
            sort: SortBy::default(),
            location: String::new(),
        }
    }
}

impl SearchQuery {
    pub fn is_selected(&self, listing_type: ListingType) -> bool {
        self.type_filters.contains(&listing_type)
    }

    pub fn toggle_type(&mut self, listing_type: ListingType) {
        if let Some(index) = self.type_filters.iter().position(|t| *t == listing_type) {
            self.type_filters.remove(index);
        } else {
            self.type_filters.push(listing_type);
            self.type_filters.sort_by_key(ListingType::filter_code);
        }
    }

    pub fn cycle_radius(&mut self) {
        let index = RADIUS_CHOICES
            .iter()
            .position(|r| *r == self.radius_miles)
            .map(|i| (i + 1) % RADIUS_CHOICES.len())
            .unwrap_or(0);
        self.radius_miles = RADIUS_CHOICES[index];
    }

    /// `@`-joined type codes; empty when every type or no type is selected,
    /// which the servlet treats as "no filter".
    pub fn type_filter_param(&self) -> String {
        let mut codes: Vec<u8> = self.type_filters.iter().map(ListingType::filter_code).collect();
        codes.sort_unstable();
        codes.dedup();
        if codes.is_empty() || codes.len() == ListingType::ALL.len() {
            return String::new();
        }
        codes
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join("@")
    }

    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("type-filters".to_string(), self.type_filter_param()),
            ("radius-filter".to_string(), self.radius_miles.to_string()),
            ("sortBy".to_string(), self.sort.as_str().to_string()),
        ];
        let location = self.location.trim();
        if !location.is_empty() {
            params.push(("location".into(), location.to_string()));
        }
        params
    }

    pub fn summary(&self) -> String {
        let types = if self.type_filter_param().is_empty() {
            "all types".to_string()
        } else {
            self.type_filters
                .iter()
                .map(ListingType::label)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let location = if self.location.trim().is_empty() {
            "anywhere".to_string()
        } else {
            format!("within {} mi of {}", self.radius_miles, self.location.trim())
        };
        format!("{types} · {location} · {}", self.sort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_query_has_no_type_filter() {
        let params = SearchQuery::default().to_params();
        assert_eq!(
            params,
            vec![
                ("type-filters".to_string(), String::new()),
                ("radius-filter".to_string(), "10".to_string()),
                ("sortBy".to_string(), "recommended".to_string()),
            ]
        );
    }

    #[test]
    fn partial_type_filters_join_codes() {
        let mut query = SearchQuery::default();
        query.toggle_type(ListingType::Petition);
        query.toggle_type(ListingType::Other);
        assert_eq!(query.type_filter_param(), "1@3");
        query.toggle_type(ListingType::Other);
        assert_eq!(query.type_filter_param(), "1@3@4");
    }

    #[test]
    fn no_selected_types_means_no_filter() {
        let query = SearchQuery {
            type_filters: Vec::new(),
            ..SearchQuery::default()
        };
        assert_eq!(query.type_filter_param(), "");
    }

    #[test]
    fn location_and_radius_are_sent() {
        let mut query = SearchQuery {
            location: "  Austin, TX ".into(),
            sort: SortBy::MostRecent,
            ..SearchQuery::default()
        };
        query.cycle_radius();
        let params = query.to_params();
        assert!(params.contains(&("radius-filter".to_string(), "25".to_string())));
        assert!(params.contains(&("location".to_string(), "Austin, TX".to_string())));
        assert!(params.contains(&("sortBy".to_string(), "most-recent".to_string())));
    }

    #[test]
    fn radius_wraps_around() {
        let mut query = SearchQuery {
            radius_miles: 100,
            ..SearchQuery::default()
        };
        query.cycle_radius();
        assert_eq!(query.radius_miles, 10);
    }
}

use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Sort orders understood by the upstream gallery.
#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SortBy {
	LastUpdated = 1,
	Installs = 4,
	PublishedDate = 10,
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Direction {
	Asc = 1,
	Desc = 2,
}

/// Criteria filter types. The last three are undocumented upstream but
/// required to restrict results to editor-targeted theme extensions.
#[derive(Serialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FilterType {
	Category = 5,
	Slug = 7,
	Unknown8 = 8,
	Unknown10 = 10,
	Unknown12 = 12,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
	pub filter_type: FilterType,
	pub value: String,
}

impl Criterion {
	pub fn new(filter_type: FilterType, value: impl Into<String>) -> Self {
		Self {
			filter_type,
			value: value.into(),
		}
	}
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
	pub page_number: u32,
	pub page_size: u32,
	pub sort_by: SortBy,
	pub direction: Direction,
	pub criteria: Vec<Criterion>,
}

impl Default for QueryOptions {
	fn default() -> Self {
		Self {
			page_number: 1,
			page_size: 100,
			sort_by: SortBy::LastUpdated,
			direction: Direction::Asc,
			criteria: Vec::new(),
		}
	}
}

impl QueryOptions {
	/// Query a single extension by its `publisher.name` slug.
	pub fn by_slug(slug: impl Into<String>) -> Self {
		Self {
			criteria: vec![Criterion::new(FilterType::Slug, slug)],
			..Self::default()
		}
	}

	/// The fixed criteria restricting results to editor theme extensions.
	pub fn theme_criteria() -> Vec<Criterion> {
		vec![
			Criterion::new(FilterType::Category, "Themes"),
			Criterion::new(FilterType::Unknown8, "Microsoft.VisualStudio.Code"),
			Criterion::new(
				FilterType::Unknown10,
				"target:\"Microsoft.VisualStudio.Code\" ",
			),
			Criterion::new(FilterType::Unknown12, "37888"),
		]
	}
}

//! Metadata schemas the query translator is allowed to filter on

use serde::Serialize;

pub const RECIPE_TYPES: &[&str] = &[
    "dessert",
    "soup",
    "salad",
    "main course",
    "appetizer",
    "beverage",
];

pub const CUISINES: &[&str] = &[
    "italian",
    "french",
    "german",
    "australian",
    "english",
    "american",
    "thai",
    "japanese",
    "chinese",
    "mexican",
    "indian",
];

pub const SPECIAL_CONSIDERATIONS: &[&str] = &[
    "vegetarian",
    "vegan",
    "keto",
    "nut-free",
    "dairy-free",
    "gluten-free",
    "low-carb",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    String,
    Enum,
    ListOfString,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeInfo {
    pub name: String,
    pub description: String,
    pub kind: AttributeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

impl AttributeInfo {
    pub fn new(name: &str, description: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            allowed_values: None,
        }
    }

    pub fn with_allowed(mut self, values: &[&str]) -> Self {
        self.allowed_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Case-insensitive membership; attributes without a closed set accept anything.
    pub fn allows(&self, value: &str) -> bool {
        match &self.allowed_values {
            Some(values) => values.iter().any(|v| v.eq_ignore_ascii_case(value.trim())),
            None => true,
        }
    }
}

/// Ordered attribute list plus a one-line description of the documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataSchema {
    pub content_description: String,
    pub attributes: Vec<AttributeInfo>,
}

impl MetadataSchema {
    pub fn get(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

pub fn recipe_schema() -> MetadataSchema {
    MetadataSchema {
        content_description: "Recipes from historical cookbooks".to_string(),
        attributes: vec![
            AttributeInfo::new(
                "recipe_type",
                "The type of recipe",
                AttributeKind::Enum,
            )
            .with_allowed(RECIPE_TYPES),
            AttributeInfo::new(
                "cuisine",
                "The national cuisine the recipe belongs to",
                AttributeKind::Enum,
            )
            .with_allowed(CUISINES),
            AttributeInfo::new(
                "special_considerations",
                "Dietary restrictions the recipe satisfies",
                AttributeKind::ListOfString,
            )
            .with_allowed(SPECIAL_CONSIDERATIONS),
            AttributeInfo::new(
                "ingredients",
                "Ingredients used in the recipe, lower case",
                AttributeKind::ListOfString,
            ),
            AttributeInfo::new("title", "Title of the recipe", AttributeKind::String),
            AttributeInfo::new(
                "source",
                "The book the recipe was taken from, or 'generated'",
                AttributeKind::String,
            ),
            AttributeInfo::new(
                "date_issued",
                "Publication date of the source book",
                AttributeKind::Date,
            ),
        ],
    }
}

//! Two-level category hierarchy and the flat product-area list.
//!
//! - [`TaxonomyDefinition`]: the admin-authored file used for re-taxonomy and
//!   for the keyword table
//! - [`NameIndex`]: point-in-time name -> id lookup built at batch start
//! - [`build_category_tree`]: parent rollup for the read API
//! - [`resolve_category_filter`]: parent names expand to their children

use std::collections::{HashMap, HashSet};

use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::keywords::KeywordTable;
use crate::models::{Category, NewCategory, NewProductArea, ProductArea};

// ============================================================================
// Taxonomy definition file
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TaxonomyDefinition {
    pub categories: Vec<CategoryDefinition>,
    #[serde(default)]
    pub product_areas: Vec<ProductAreaDefinition>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CategoryDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Used only when the category has no subcategories.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub subcategories: Vec<SubcategoryDefinition>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubcategoryDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProductAreaDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl TaxonomyDefinition {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    /// Category names are unique across both levels; product-area names are
    /// unique among themselves. No name may be blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.categories.is_empty() {
            return Err(ValidationError::InvalidTaxonomy(
                "at least one category is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let category_names = self.categories.iter().flat_map(|c| {
            std::iter::once(c.name.as_str()).chain(c.subcategories.iter().map(|s| s.name.as_str()))
        });
        for name in category_names {
            check_name(name, &mut seen)?;
        }

        let mut seen_areas = HashSet::new();
        for area in &self.product_areas {
            check_name(&area.name, &mut seen_areas)?;
        }

        Ok(())
    }

    /// Insert forms in file order; `sort_order` is the position among siblings.
    pub fn new_categories(&self) -> Vec<NewCategory> {
        self.categories
            .iter()
            .enumerate()
            .map(|(i, c)| NewCategory {
                name: c.name.trim().to_string(),
                description: c.description.clone(),
                sort_order: i as i32,
                children: c
                    .subcategories
                    .iter()
                    .enumerate()
                    .map(|(j, s)| NewCategory {
                        name: s.name.trim().to_string(),
                        description: s.description.clone(),
                        sort_order: j as i32,
                        children: Vec::new(),
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn new_product_areas(&self) -> Vec<NewProductArea> {
        self.product_areas
            .iter()
            .enumerate()
            .map(|(i, a)| NewProductArea {
                name: a.name.trim().to_string(),
                description: a.description.clone(),
                sort_order: i as i32,
            })
            .collect()
    }

    /// Keyword rules for every assignable (leaf) category, in file order.
    pub fn keyword_table(&self) -> KeywordTable {
        let rules = self.categories.iter().flat_map(|c| {
            if c.subcategories.is_empty() {
                vec![(c.name.trim().to_string(), c.keywords.clone())]
            } else {
                c.subcategories
                    .iter()
                    .map(|s| (s.name.trim().to_string(), s.keywords.clone()))
                    .collect()
            }
        });
        KeywordTable::new(rules)
    }
}

fn check_name<'a>(name: &'a str, seen: &mut HashSet<&'a str>) -> Result<(), ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::Required { field: "name" });
    }
    if !seen.insert(name) {
        return Err(ValidationError::DuplicateName(name.to_string()));
    }
    Ok(())
}

// ============================================================================
// Name -> id snapshot
// ============================================================================

/// Name -> id lookup over the assignable entries of the active taxonomy.
///
/// Rebuilt at the start of each batch; renames during a batch are not seen.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    version: i32,
    names: Vec<String>,
    ids: HashMap<String, Uuid>,
}

impl NameIndex {
    fn from_entries(version: i32, entries: Vec<(String, Uuid)>) -> Self {
        let names = entries.iter().map(|(n, _)| n.clone()).collect();
        let ids = entries.into_iter().collect();
        Self { version, names, ids }
    }

    /// Leaf categories: every level-1 category plus level-0 categories that
    /// have no active children. Ordered by parent then child sort order.
    pub fn for_categories(categories: &[Category]) -> Self {
        let active: Vec<&Category> = categories.iter().filter(|c| c.is_active).collect();
        let parents_with_children: HashSet<Uuid> =
            active.iter().filter_map(|c| c.parent_id).collect();
        let parent_order: HashMap<Uuid, i32> = active
            .iter()
            .filter(|c| c.is_parent())
            .map(|c| (c.id, c.sort_order))
            .collect();

        let mut leaves: Vec<(i32, i32, &Category)> = active
            .iter()
            .filter(|c| !(c.is_parent() && parents_with_children.contains(&c.id)))
            .map(|c| match c.parent_id {
                Some(parent) => (
                    parent_order.get(&parent).copied().unwrap_or(i32::MAX),
                    c.sort_order,
                    *c,
                ),
                None => (c.sort_order, -1, *c),
            })
            .collect();
        leaves.sort_by(|a, b| (a.0, a.1, &a.2.name).cmp(&(b.0, b.1, &b.2.name)));

        let version = active.iter().map(|c| c.taxonomy_version).max().unwrap_or(0);
        Self::from_entries(
            version,
            leaves.into_iter().map(|(_, _, c)| (c.name.clone(), c.id)).collect(),
        )
    }

    pub fn for_product_areas(areas: &[ProductArea]) -> Self {
        let mut active: Vec<&ProductArea> = areas.iter().filter(|a| a.is_active).collect();
        active.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));

        let version = active.iter().map(|a| a.taxonomy_version).max().unwrap_or(0);
        Self::from_entries(
            version,
            active.into_iter().map(|a| (a.name.clone(), a.id)).collect(),
        )
    }

    pub fn resolve(&self, name: &str) -> Option<Uuid> {
        self.ids.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ============================================================================
// Rollup
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryNode {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub level: i32,
    pub sort_order: i32,
    pub post_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategories: Option<Vec<CategoryNode>>,
}

impl CategoryNode {
    fn leaf(category: &Category, post_count: i64) -> Self {
        Self {
            id: category.id,
            name: category.name.clone(),
            description: category.description.clone(),
            parent_id: category.parent_id,
            level: category.level,
            sort_order: category.sort_order,
            post_count,
            subcategories: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryTree {
    /// Parents with their sorted children nested.
    pub data: Vec<CategoryNode>,
    /// Every active category in tree order, no nesting.
    pub flat: Vec<CategoryNode>,
}

/// Nest active children under their parents and roll child post counts up.
///
/// A parent with children counts the sum of its children; a childless parent
/// counts its own direct assignments.
pub fn build_category_tree(categories: &[Category], counts: &HashMap<Uuid, i64>) -> CategoryTree {
    let count_of = |id: &Uuid| counts.get(id).copied().unwrap_or(0);

    let mut parents: Vec<&Category> = categories
        .iter()
        .filter(|c| c.is_active && c.is_parent())
        .collect();
    parents.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));

    let mut data = Vec::with_capacity(parents.len());
    let mut flat = Vec::with_capacity(categories.len());

    for parent in parents {
        let mut children: Vec<&Category> = categories
            .iter()
            .filter(|c| c.is_active && c.parent_id == Some(parent.id))
            .collect();
        children.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));

        let child_nodes: Vec<CategoryNode> = children
            .iter()
            .map(|c| CategoryNode::leaf(c, count_of(&c.id)))
            .collect();

        let post_count = if child_nodes.is_empty() {
            count_of(&parent.id)
        } else {
            child_nodes.iter().map(|c| c.post_count).sum()
        };

        let mut node = CategoryNode::leaf(parent, post_count);
        flat.push(node.clone());
        flat.extend(child_nodes.iter().cloned());
        node.subcategories = Some(child_nodes);
        data.push(node);
    }

    CategoryTree { data, flat }
}

// ============================================================================
// Filter resolution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFilter {
    /// Unknown name: no filtering.
    All,
    /// Posts assigned to any of these category ids.
    Ids(Vec<Uuid>),
}

/// Resolve a category name from the read API against the active set.
pub fn resolve_category_filter(categories: &[Category], name: &str) -> CategoryFilter {
    let Some(category) = categories.iter().find(|c| c.is_active && c.name == name) else {
        return CategoryFilter::All;
    };

    if !category.is_parent() {
        return CategoryFilter::Ids(vec![category.id]);
    }

    let children: Vec<Uuid> = categories
        .iter()
        .filter(|c| c.is_active && c.parent_id == Some(category.id))
        .map(|c| c.id)
        .collect();

    if children.is_empty() {
        CategoryFilter::Ids(vec![category.id])
    } else {
        CategoryFilter::Ids(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::category::{LEVEL_CHILD, LEVEL_PARENT};

    fn parent(name: &str, sort_order: i32) -> Category {
        Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            parent_id: None,
            level: LEVEL_PARENT,
            sort_order,
            is_active: true,
            taxonomy_version: 2,
        }
    }

    fn child(name: &str, parent: &Category, sort_order: i32) -> Category {
        Category {
            parent_id: Some(parent.id),
            level: LEVEL_CHILD,
            ..self::parent(name, sort_order)
        }
    }

    fn sample() -> (Category, Category, Category, Category) {
        let knowledge = parent("Knowledge", 0);
        let retrieval = child("Knowledge Retrieval", &knowledge, 0);
        let formatting = child("Knowledge Formatting", &knowledge, 1);
        let general = parent("General", 1);
        (knowledge, retrieval, formatting, general)
    }

    #[test]
    fn test_parent_rolls_up_children() {
        let (knowledge, retrieval, formatting, general) = sample();
        let counts = HashMap::from([(retrieval.id, 12), (formatting.id, 5), (general.id, 3)]);
        let categories = vec![formatting.clone(), general.clone(), knowledge.clone(), retrieval.clone()];

        let tree = build_category_tree(&categories, &counts);

        assert_eq!(tree.data.len(), 2);
        assert_eq!(tree.data[0].name, "Knowledge");
        assert_eq!(tree.data[0].post_count, 17);
        let subs = tree.data[0].subcategories.as_ref().unwrap();
        assert_eq!(subs[0].name, "Knowledge Retrieval");
        assert_eq!(subs[1].name, "Knowledge Formatting");

        assert_eq!(tree.data[1].name, "General");
        assert_eq!(tree.data[1].post_count, 3);
        assert_eq!(tree.data[1].subcategories.as_deref(), Some(&[][..]));

        let flat: Vec<(&str, i64)> = tree.flat.iter().map(|n| (n.name.as_str(), n.post_count)).collect();
        assert_eq!(
            flat,
            vec![
                ("Knowledge", 17),
                ("Knowledge Retrieval", 12),
                ("Knowledge Formatting", 5),
                ("General", 3),
            ]
        );
    }

    #[test]
    fn test_inactive_categories_are_left_out() {
        let (knowledge, retrieval, mut formatting, _) = sample();
        formatting.is_active = false;
        let counts = HashMap::from([(retrieval.id, 2), (formatting.id, 40)]);

        let tree = build_category_tree(&[knowledge, retrieval, formatting], &counts);
        assert_eq!(tree.data[0].post_count, 2);
        assert_eq!(tree.flat.len(), 2);
    }

    #[test]
    fn test_name_index_only_holds_leaves() {
        let (knowledge, retrieval, formatting, general) = sample();
        let index = NameIndex::for_categories(&[general.clone(), knowledge, formatting, retrieval.clone()]);

        assert_eq!(
            index.names(),
            &["Knowledge Retrieval", "Knowledge Formatting", "General"]
        );
        assert_eq!(index.resolve("Knowledge"), None);
        assert_eq!(index.resolve("Knowledge Retrieval"), Some(retrieval.id));
        assert_eq!(index.resolve("General"), Some(general.id));
        assert_eq!(index.version(), 2);
    }

    #[test]
    fn test_filter_expands_parent_to_children() {
        let (knowledge, retrieval, formatting, general) = sample();
        let all = vec![knowledge, retrieval.clone(), formatting.clone(), general.clone()];

        assert_eq!(
            resolve_category_filter(&all, "Knowledge"),
            CategoryFilter::Ids(vec![retrieval.id, formatting.id])
        );
        assert_eq!(
            resolve_category_filter(&all, "Knowledge Formatting"),
            CategoryFilter::Ids(vec![formatting.id])
        );
        assert_eq!(
            resolve_category_filter(&all, "General"),
            CategoryFilter::Ids(vec![general.id])
        );
        assert_eq!(resolve_category_filter(&all, "Nope"), CategoryFilter::All);
    }

    #[test]
    fn test_definition_validation() {
        let ok = TaxonomyDefinition {
            categories: vec![CategoryDefinition {
                name: "Knowledge".into(),
                description: None,
                keywords: vec![],
                subcategories: vec![SubcategoryDefinition {
                    name: "Knowledge Retrieval".into(),
                    description: None,
                    keywords: vec!["rag".into()],
                }],
            }],
            product_areas: vec![],
        };
        assert!(ok.validate().is_ok());

        let mut dup = ok.clone();
        dup.categories[0].subcategories[0].name = "Knowledge".into();
        assert_eq!(
            dup.validate(),
            Err(ValidationError::DuplicateName("Knowledge".into()))
        );

        let empty = TaxonomyDefinition {
            categories: vec![],
            product_areas: vec![],
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_keyword_table_uses_leaves() {
        let def = TaxonomyDefinition {
            categories: vec![
                CategoryDefinition {
                    name: "Knowledge".into(),
                    description: None,
                    keywords: vec!["ignored".into()],
                    subcategories: vec![SubcategoryDefinition {
                        name: "Knowledge Retrieval".into(),
                        description: None,
                        keywords: vec!["RAG".into()],
                    }],
                },
                CategoryDefinition {
                    name: "General".into(),
                    description: None,
                    keywords: vec![],
                    subcategories: vec![],
                },
            ],
            product_areas: vec![],
        };

        let table = def.keyword_table();
        assert_eq!(table.rules().len(), 2);
        assert_eq!(table.keywords_for("Knowledge Retrieval"), Some(&["rag".to_string()][..]));
        assert_eq!(table.keywords_for("General"), Some(&[][..]));
        assert_eq!(table.keywords_for("Knowledge"), None);
    }

    #[test]
    fn test_sample_taxonomy_file_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../taxonomy.toml");
        let def = TaxonomyDefinition::load(path).expect("sample taxonomy should parse");
        def.validate().expect("sample taxonomy should validate");
        assert!(def.categories.iter().any(|c| c.name == "General"));
        assert!(!def.product_areas.is_empty());
    }
}

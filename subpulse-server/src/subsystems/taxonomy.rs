//! Administrative re-taxonomy: replace the active category tree and product
//! areas from a taxonomy definition file.

use serde::Serialize;
use subpulse_core::error::SubpulseError;
use subpulse_core::store::Store;
use subpulse_core::taxonomy::TaxonomyDefinition;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomyApplied {
    pub category_version: i32,
    pub parents: usize,
    pub children: usize,
    /// `None` when the definition lists no product areas and the existing
    /// ones were kept.
    pub product_area_version: Option<i32>,
}

/// Validate `definition` and replace the active taxonomy with it. Existing
/// assignments from older taxonomy versions are removed by the store.
pub async fn apply_taxonomy(
    store: &dyn Store,
    definition: &TaxonomyDefinition,
) -> Result<TaxonomyApplied, SubpulseError> {
    definition.validate()?;

    let categories = definition.new_categories();
    let children = categories.iter().map(|c| c.children.len()).sum();
    let category_version = store.replace_categories(&categories).await?;

    let product_area_version = if definition.product_areas.is_empty() {
        tracing::info!("No product areas in taxonomy definition, keeping existing ones");
        None
    } else {
        Some(store.replace_product_areas(&definition.new_product_areas()).await?)
    };

    tracing::info!(
        category_version,
        parents = categories.len(),
        children,
        ?product_area_version,
        "Taxonomy applied"
    );

    Ok(TaxonomyApplied {
        category_version,
        parents: categories.len(),
        children,
        product_area_version,
    })
}

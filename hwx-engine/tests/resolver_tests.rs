//! Catalog resolution against a seeded catalog

use std::io::Write;
use std::sync::Arc;

use hwx_engine::cache::FingerprintCache;
use hwx_engine::catalog::{CatalogStore, SqliteCatalog};
use hwx_engine::collaborators::BasicNormalizer;
use hwx_engine::db::init_memory_pool;
use hwx_engine::resolver::{rank, CatalogResolver, Resolution};
use hwx_engine::types::{CanonicalEntry, ComponentCategory, MatchStrategy};

async fn seeded(entries: &[CanonicalEntry]) -> (SqliteCatalog, FingerprintCache) {
    let pool = init_memory_pool().await.unwrap();
    let catalog = SqliteCatalog::new(pool.clone());
    for entry in entries {
        catalog.upsert(entry).await.unwrap();
    }
    (catalog, FingerprintCache::new(pool, 3600))
}

fn entry(brand: &str, model: &str, part_number: Option<&str>) -> CanonicalEntry {
    CanonicalEntry::new(
        ComponentCategory::Ram,
        brand,
        model,
        part_number.map(str::to_string),
    )
}

#[test]
fn test_fuzzy_model_at_threshold_is_excluded() {
    let entries = vec![entry("Zeta", "abcdefghij", None)];
    assert_eq!(rank("abcdefgxyz", &entries, &BasicNormalizer), Resolution::NoMatch);
}

#[test]
fn test_fuzzy_model_above_threshold_is_scaled() {
    let model = format!("{}{}", "k".repeat(71), "m".repeat(29));
    let input = format!("{}{}", "k".repeat(71), "n".repeat(29));
    let entries = vec![entry("Zeta", &model, None)];

    let Resolution::Candidates(candidates) = rank(&input, &entries, &BasicNormalizer) else {
        panic!("a lone fuzzy match is never exact");
    };
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].strategy, MatchStrategy::FuzzyModel);
    assert!((candidates[0].score - 0.639).abs() < 1e-9);
}

#[test]
fn test_part_number_takes_precedence() {
    let entries = vec![
        entry("Crucial", "Pro 32GB Kit", Some("CT2K16G56C46U5")),
        entry("Crucial", "Pro 64GB Kit", Some("CP2K32G56C46U5")),
    ];

    let Resolution::Exact(candidate) = rank("crucial ct2k16g56c46u5", &entries, &BasicNormalizer) else {
        panic!("expected an exact match");
    };
    assert_eq!(candidate.entry.model, "Pro 32GB Kit");
    assert_eq!(candidate.strategy, MatchStrategy::ExactPartNumber);
    assert!((candidate.score - 0.98).abs() < 1e-9);
}

#[test]
fn test_two_high_scorers_are_ambiguous() {
    let entries = vec![
        entry("Kingston", "FURY Beast", Some("KF556C40BBK2-32")),
        entry("Kingston", "FURY Beast RGB", Some("KF556C40BBAK2-32")),
    ];

    let Resolution::Candidates(candidates) = rank("kingston fury beast rgb", &entries, &BasicNormalizer) else {
        panic!("expected candidates");
    };
    assert_eq!(candidates.len(), 2);
    assert!(candidates.iter().all(|c| c.strategy == MatchStrategy::ExactModel));
    // Equal scores keep catalog order
    assert_eq!(candidates[0].entry.model, "FURY Beast");
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let entries = vec![
        entry("G.Skill", "Trident Z5 RGB 32GB", None),
        entry("G.Skill", "Trident Z5 Neo 32GB", None),
        entry("G.Skill", "Ripjaws S5 32GB", None),
    ];
    let (catalog, _) = seeded(&entries).await;
    let resolver = CatalogResolver::new(Arc::new(catalog), Arc::new(BasicNormalizer));

    let first = resolver.resolve("G.Skill Trident", ComponentCategory::Ram).await.unwrap();
    for _ in 0..5 {
        let again = resolver.resolve("  g.skill   TRIDENT ", ComponentCategory::Ram).await.unwrap();
        assert_eq!(again, first);
    }
    assert_eq!(first.candidates().len(), 2);
}

#[tokio::test]
async fn test_cached_resolution_follows_catalog_revision() {
    let (catalog, cache) = seeded(&[entry("Crucial", "Pro 32GB Kit", Some("CT2K16G56C46U5"))]).await;
    let resolver =
        CatalogResolver::new(Arc::new(catalog.clone()), Arc::new(BasicNormalizer)).with_cache(cache);

    let before = resolver.resolve("Pro 64GB Kit", ComponentCategory::Ram).await.unwrap();
    assert!(!matches!(before, Resolution::Exact(_)));

    catalog
        .upsert(&entry("Crucial", "Pro 64GB Kit", Some("CP2K32G56C46U5")))
        .await
        .unwrap();

    // A catalog write must not serve the stale resolution
    let after = resolver.resolve("Pro 64GB Kit", ComponentCategory::Ram).await.unwrap();
    let candidates = after.candidates();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].strategy, MatchStrategy::ExactModel);
    assert_eq!(candidates[0].entry.part_number.as_deref(), Some("CP2K32G56C46U5"));
}

#[tokio::test]
async fn test_other_categories_are_not_searched() {
    let (catalog, _) = seeded(&[entry("Crucial", "Pro 32GB Kit", Some("CT2K16G56C46U5"))]).await;
    let resolver = CatalogResolver::new(Arc::new(catalog), Arc::new(BasicNormalizer));

    let resolution = resolver
        .resolve("CT2K16G56C46U5", ComponentCategory::Disk)
        .await
        .unwrap();
    assert_eq!(resolution, Resolution::NoMatch);
}

#[tokio::test]
async fn test_seed_file_feeds_resolution() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[
            {{"category": "CPU", "brand": "Intel", "model": "Core i7-12700K", "part_number": "BX8071512700K"}},
            {{"category": "CPU", "brand": "AMD", "model": "Ryzen 7 7800X3D"}}
        ]"#
    )
    .unwrap();

    let (catalog, _) = seeded(&[]).await;
    assert_eq!(catalog.seed_from_json(file.path()).await.unwrap(), 2);
    let resolver = CatalogResolver::new(Arc::new(catalog), Arc::new(BasicNormalizer));

    let Resolution::Exact(candidate) = resolver
        .resolve("Intel Core i7-12700K", ComponentCategory::Cpu)
        .await
        .unwrap()
    else {
        panic!("expected an exact match");
    };
    assert_eq!(candidate.entry.brand, "Intel");
}

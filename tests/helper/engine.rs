//! Engine construction over a temporary data directory

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sdkvm::candidate::Candidate;
use sdkvm::catalog::CatalogClient;
use sdkvm::catalog::source::CatalogSource;
use sdkvm::engine::{CandidateEngine, EngineSettings};
use sdkvm::installer::ArchiveInstaller;
use sdkvm::inventory::InventoryStore;
use sdkvm::version::ordering::VersionScheme;

pub fn candidates(data_dir: &Path) -> Vec<Candidate> {
    ["java", "maven", "gradle"]
        .iter()
        .map(|id| {
            let name = match *id {
                "java" => "Java",
                "maven" => "Maven",
                _ => "Gradle",
            };
            Candidate::new(
                id,
                name,
                data_dir.join("candidates").join(id),
                VersionScheme::Numeric,
            )
        })
        .collect()
}

pub fn open_engine(
    data_dir: &Path,
    source: Arc<dyn CatalogSource>,
    installer: Arc<dyn ArchiveInstaller>,
) -> CandidateEngine {
    let candidates = candidates(data_dir);
    let inventory = InventoryStore::open(&data_dir.join("inventory.db"), &candidates).unwrap();
    let catalog = CatalogClient::new(
        source,
        None,
        candidates.iter().map(|c| c.id.clone()).collect(),
        Duration::from_secs(5),
    );
    CandidateEngine::new(
        candidates,
        inventory,
        catalog,
        installer,
        EngineSettings {
            catalog_max_age: Duration::from_secs(3600),
            event_buffer: 256,
        },
    )
    .unwrap()
}

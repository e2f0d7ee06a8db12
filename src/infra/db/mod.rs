//! Document-store repository implementations.

mod memory;
mod query;

pub use memory::MemoryRepository;

use std::sync::Arc;

use crate::application::repos::Repositories;

/// One in-process repository per collection, with the unique indexes each collection declares.
pub fn memory_repositories() -> Repositories {
    Repositories {
        ads: Arc::new(MemoryRepository::new("ads").with_unique("ads_ad_id_key", &["ad_id"])),
        countries: Arc::new(
            MemoryRepository::new("countries").with_unique("countries_slug_key", &["slug"]),
        ),
        cities: Arc::new(
            MemoryRepository::new("cities")
                .with_unique("cities_country_slug_key", &["country", "slug"])
                .with_unique("cities_country_state_name_key", &["country", "state", "name"]),
        ),
        faqs: Arc::new(MemoryRepository::new("faqs").with_unique("faqs_slug_key", &["slug"])),
        feedback: Arc::new(MemoryRepository::new("feedback")),
        dropdowns: Arc::new(
            MemoryRepository::new("dropdowns").with_unique("dropdowns_name_key", &["name"]),
        ),
        pages: Arc::new(MemoryRepository::new("pages").with_unique("pages_type_key", &["type"])),
        servers: Arc::new(
            MemoryRepository::new("servers")
                .with_unique("servers_ip_os_type_key", &["general.ip", "general.os_type"]),
        ),
        connectivity: Arc::new(MemoryRepository::new("connectivity")),
    }
}

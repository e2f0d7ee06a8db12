use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use vynox::{
    application::{
        admin::{VERSIONED_NAMESPACES, namespace_by_name},
        error::AppError,
    },
    cache::{CacheClient, KvError, MemoryStore, Namespace, PointKey, VersionedCache},
    config::{self, CacheBackend, PointKind},
    infra::{error::InfraError, redis::RedisStore, telemetry},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let cache = build_cache(&settings)?;
    let command = cli_args.command.unwrap_or(config::Command::Status);

    match command {
        config::Command::Status => run_status(&cache).await,
        config::Command::Bump(args) => run_bump(&cache, args).await,
        config::Command::Evict(args) => run_evict(&cache, args).await,
        config::Command::Reset(args) => run_reset(&cache, args).await,
    }
}

fn build_cache(settings: &config::Settings) -> Result<VersionedCache, AppError> {
    let config = settings.cache.config.clone();

    let client = match (settings.cache.backend, settings.redis.url.as_deref()) {
        (CacheBackend::Redis, Some(url)) => {
            let store = RedisStore::open(url, &settings.redis)?;
            CacheClient::new(Arc::new(store))
        }
        (CacheBackend::Redis, None) => {
            warn!(
                target = "vynox::cli",
                "No redis url configured; running with caching disabled"
            );
            CacheClient::disabled()
        }
        (CacheBackend::Memory, _) => {
            CacheClient::new(Arc::new(MemoryStore::new(config.memory_capacity_non_zero())))
        }
        (CacheBackend::Disabled, _) => CacheClient::disabled(),
    };

    Ok(VersionedCache::new(client, config))
}

async fn run_status(cache: &VersionedCache) -> Result<(), AppError> {
    cache.client().ping().await?;
    info!(target = "vynox::cli", "Cache store reachable");

    for namespace in VERSIONED_NAMESPACES {
        let generation = cache
            .generations()
            .current(namespace)
            .await
            .ok_or_else(|| KvError::unavailable(format!("could not read `{namespace}`")))?;
        println!("{namespace}\t{generation}");
    }
    Ok(())
}

async fn run_bump(cache: &VersionedCache, args: config::BumpArgs) -> Result<(), AppError> {
    let namespace = resolve_namespace(&args.namespace)?;
    let next = cache
        .generations()
        .bump(namespace)
        .await
        .ok_or_else(|| KvError::unavailable(format!("could not bump `{namespace}`")))?;

    info!(
        target = "vynox::cli",
        namespace = %namespace,
        generation = next,
        "Generation bumped"
    );
    println!("{namespace}\t{next}");
    Ok(())
}

async fn run_evict(cache: &VersionedCache, args: config::EvictArgs) -> Result<(), AppError> {
    let namespace = resolve_namespace(&args.namespace)?;
    let (kind, value) = args
        .point()
        .ok_or_else(|| AppError::validation("evict requires one of --id, --name or --type"))?;
    let point = match kind {
        PointKind::Id => PointKey::id(value),
        PointKind::Name => PointKey::Name(value.to_string()),
        PointKind::Type => PointKey::Type(value.to_string()),
    };

    cache.client().ping().await?;
    cache.evict(namespace, std::slice::from_ref(&point)).await;
    info!(
        target = "vynox::cli",
        key = %namespace.point_key(&point),
        "Point entry evicted"
    );
    Ok(())
}

async fn run_reset(cache: &VersionedCache, args: config::ResetArgs) -> Result<(), AppError> {
    if !args.yes {
        return Err(AppError::validation(
            "reset flushes every cached key; pass --yes to confirm",
        ));
    }

    cache.client().flush().await?;
    warn!(target = "vynox::cli", "Cache database flushed");
    Ok(())
}

fn resolve_namespace(name: &str) -> Result<Namespace, AppError> {
    namespace_by_name(name.trim()).ok_or_else(|| {
        let known = VERSIONED_NAMESPACES
            .iter()
            .map(Namespace::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        AppError::validation(format!("unknown namespace `{name}` (expected one of {known})"))
    })
}

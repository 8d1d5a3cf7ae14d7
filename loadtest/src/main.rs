use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the webp-proxy service.
///
/// Traffic mix:
/// - Fixed fit/resize requests (cache hits after warmup)
/// - Randomized geometries (cache misses, fetch + transform)
/// - Conditional revalidation (304 path)
/// - Health monitoring endpoint
///
/// # Usage
/// ```bash
/// cd loadtest
/// SOURCE_URL=https://picsum.photos/id/10/2000/1500 \
///   cargo run --release -- --host http://localhost:3000 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// # Performance Targets
/// - Cache hits / 304: <20ms p95 latency
/// - Cache misses: <300ms p95 latency
/// - Error rate: <1%

const DEFAULT_SOURCE: &str = "https://picsum.photos/id/10/2000/1500";

fn source_token() -> String {
    let source = std::env::var("SOURCE_URL").unwrap_or_else(|_| DEFAULT_SOURCE.to_string());
    URL_SAFE_NO_PAD.encode(source.as_bytes())
}

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("ImageTransformation")
                .register_transaction(transaction!(random_fit).set_weight(5)?)
                .register_transaction(transaction!(random_resize).set_weight(5)?)
                .register_transaction(transaction!(health_check).set_weight(1)?),
        )
        .register_scenario(
            scenario!("CachePerformance")
                // Same key every time: one miss, then hits
                .register_transaction(transaction!(cached_fit).set_weight(15)?)
                .register_transaction(transaction!(revalidate).set_weight(5)?)
                // Timestamp-derived widths keep producing new keys
                .register_transaction(transaction!(uncached_resize).set_weight(2)?),
        )
        .execute()
        .await?;

    Ok(())
}

/// Fit with randomized box; mostly misses until the key space fills.
async fn random_fit(user: &mut GooseUser) -> TransactionResult {
    // Generate before await to satisfy Send bounds
    let path = {
        let mut rng = rand::thread_rng();
        format!(
            "/img/{}/fit?size={}x{}",
            source_token(),
            rng.gen_range(100..800),
            rng.gen_range(100..800)
        )
    };

    let _goose = user.get(&path).await?;
    Ok(())
}

async fn random_resize(user: &mut GooseUser) -> TransactionResult {
    let path = {
        let mut rng = rand::thread_rng();
        format!("/img/{}/resize?size={}", source_token(), rng.gen_range(100..1200))
    };

    let _goose = user.get(&path).await?;
    Ok(())
}

/// Fixed parameters so every request after the first is a hit.
async fn cached_fit(user: &mut GooseUser) -> TransactionResult {
    let path = format!("/img/{}/fit?size=500x500", source_token());
    let _goose = user.get(&path).await?;
    Ok(())
}

/// Fetches once, then replays the ETag and expects 304.
async fn revalidate(user: &mut GooseUser) -> TransactionResult {
    let path = format!("/img/{}/resize?size=400", source_token());
    let goose = user.get(&path).await?;

    let etag = goose
        .response
        .as_ref()
        .ok()
        .and_then(|r| r.headers().get("etag"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(etag) = etag {
        let builder = user
            .get_request_builder(&GooseMethod::Get, &path)?
            .header("If-None-Match", etag);
        let request = GooseRequest::builder()
            .path(path.as_str())
            .set_request_builder(builder)
            .expect_status_code(304)
            .build();
        let _goose = user.request(request).await?;
    }

    Ok(())
}

/// Timestamp-derived widths guarantee new cache keys.
async fn uncached_resize(user: &mut GooseUser) -> TransactionResult {
    let width = 200 + (chrono::Utc::now().timestamp_millis() % 1000);
    let path = format!("/img/{}/resize?size={}", source_token(), width);

    let _goose = user.get(&path).await?;
    Ok(())
}

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}

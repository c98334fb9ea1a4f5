//! CORS layer from the workflow's merged CORS settings.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use trellis::config::CorsConfig;

/// Builds the layer, or `None` when CORS is explicitly disabled.
///
/// A wildcard origin together with credentials switches to origin mirroring,
/// since `Access-Control-Allow-Origin: *` cannot be combined with
/// `Access-Control-Allow-Credentials: true`.
pub(crate) fn cors_layer(cfg: &CorsConfig) -> Option<CorsLayer> {
    if !cfg.is_enabled() {
        return None;
    }
    let credentials = cfg.allow_credentials.unwrap_or(true);
    let wildcard = cfg.allow_origins.iter().any(|o| o == "*");

    let origin = if wildcard {
        if credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::any()
        }
    } else {
        AllowOrigin::list(
            cfg.allow_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    let methods: Vec<Method> = cfg
        .allow_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    let headers: Vec<HeaderName> = cfg
        .allow_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    let mut layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::list(headers));
    if credentials {
        layer = layer.allow_credentials(true);
    }
    Some(layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_yields_no_layer() {
        let cfg: CorsConfig = serde_yaml::from_str("enableCors: false").unwrap();
        assert!(cors_layer(&CorsConfig::merged(Some(&cfg))).is_none());
    }

    #[test]
    fn defaults_yield_a_layer() {
        assert!(cors_layer(&CorsConfig::defaults()).is_some());
    }
}

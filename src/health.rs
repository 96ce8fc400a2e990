use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let (bridge_frontends, bridge_backends) = state.registry.bridge_counts();
    let observer_status = observer_load(&config, state.registry.observer_count());

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "avatar-session-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": metrics.active_sessions
        },
        "connections": {
            "primaries": state.registry.primary_count(),
            "observers": state.registry.observer_count(),
            "bridge_frontends": bridge_frontends,
            "bridge_backends": bridge_backends
        },
        "character": {
            "conf_uid": state.services.conf_uid(),
            "conf_name": state.services.character_snapshot().conf_name
        },
        "observers": observer_status
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": metrics.active_sessions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "performance": {
            "max_observers": state.get_config().performance.max_observers,
            "queue_warn_depth": state.get_config().performance.queue_warn_depth
        }
    }))
}

fn observer_load(config: &crate::config::AppConfig, observer_count: usize) -> serde_json::Value {
    let usage = if config.performance.max_observers > 0 {
        observer_count as f64 / config.performance.max_observers as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "usage_percent": (usage * 100.0).round(),
        "max_observers": config.performance.max_observers,
        "current_observers": observer_count,
        "load_warnings": if usage > 0.8 {
            vec!["High observer usage - consider increasing max_observers"]
        } else {
            vec![]
        }
    })
}

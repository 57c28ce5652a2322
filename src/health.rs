use crate::state::{AppState, SessionSnapshot};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let sessions = state.session_snapshot();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "un-translator-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "sessions": session_status(&sessions),
        "upstream": {
            "endpoint": config.upstream.endpoint,
            "model": config.upstream.model_id,
            "region": config.upstream.region
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let sessions = state.session_snapshot();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

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
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "sessions": {
            "active": sessions.active,
            "started": sessions.started,
            "failed": sessions.failed,
            "max_concurrent": sessions.max
        }
    }))
}

fn session_status(sessions: &SessionSnapshot) -> serde_json::Value {
    let usage = if sessions.max > 0 {
        sessions.active as f64 / sessions.max as f64
    } else {
        0.0
    };

    let load = if usage >= 1.0 {
        "at_capacity"
    } else if usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "active": sessions.active,
        "max": sessions.max,
        "usage_percent": (usage * 100.0).round(),
        "load": load
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    fn app_state(max_sessions: usize) -> AppState {
        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = max_sessions;
        AppState::new(config)
    }

    #[actix_web::test]
    async fn test_session_load_levels() {
        let snapshot = |active| SessionSnapshot { active, started: 0, failed: 0, max: 10 };
        assert_eq!(session_status(&snapshot(2))["load"], "normal");
        assert_eq!(session_status(&snapshot(8))["load"], "high_load");
        assert_eq!(session_status(&snapshot(10))["load"], "at_capacity");
        assert_eq!(session_status(&snapshot(5))["usage_percent"], 50.0);
    }

    #[actix_web::test]
    async fn test_health_reports_sessions_and_upstream() {
        let state = app_state(4);
        let _permit = state.try_acquire_session().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["sessions"]["active"], 1);
        assert_eq!(body["sessions"]["max"], 4);
        assert_eq!(body["upstream"]["model"], "amazon.nova-sonic-v1:0");
    }

    #[actix_web::test]
    async fn test_metrics_include_session_counters() {
        let state = app_state(2);
        {
            let permit = state.try_acquire_session().unwrap();
            permit.mark_failed();
        }
        state.record_request("GET /health", 12, false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["sessions"], json!({"active": 0, "started": 1, "failed": 1, "max_concurrent": 2}));
        assert_eq!(body["overall"]["total_requests"], 1);
        assert_eq!(body["endpoints"][0]["endpoint"], "GET /health");
    }
}

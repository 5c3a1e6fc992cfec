use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use tower::util::ServiceExt;

use metrics_relay::{
    AggregatingEndpoint, AuthType, BaseExporterConfig, EndpointBackend, EndpointConfig,
    EndpointRegistry, ExporterConfig, FileExporterConfig, MetricFamily, MetricKind, MetricProxy,
    RelayConfig, Sample, ScrapeError, ScrapeParams, TEXT_CONTENT_TYPE,
};

static TEMP_SEQ: AtomicU32 = AtomicU32::new(0);

fn temp_file(tag: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "metrics-relay-http-test-{}-{}-{tag}",
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed),
    ));
    std::fs::write(&path, contents).expect("write temp file");
    path
}

fn file_exporter(name: &str, path: &std::path::Path) -> ExporterConfig {
    ExporterConfig::File(FileExporterConfig {
        base: BaseExporterConfig {
            name: name.to_string(),
            no_rewrite: false,
            labels: Default::default(),
        },
        path: path.to_path_buf(),
    })
}

fn endpoint_config(path: &str, exporters: Vec<ExporterConfig>) -> EndpointConfig {
    EndpointConfig {
        path: path.to_string(),
        auth_type: AuthType::None,
        htpasswd_file: None,
        scrape_timeout: 5.0,
        exporters,
    }
}

async fn get_body(router: axum::Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn fans_out_and_orders_backends_by_declaration() {
    let a = temp_file("a", "up 1\n");
    let b = temp_file("b", "up 1\n");
    let config = RelayConfig {
        reverse_exporters: vec![endpoint_config(
            "/metrics",
            vec![file_exporter("a", &a), file_exporter("b", &b)],
        )],
    };
    let registry = EndpointRegistry::from_config(&config).expect("registry");

    let response = registry
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some(TEXT_CONTENT_TYPE)
    );

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    let first = body
        .find("up{exported_instance=\"a\"} 1")
        .expect("sample from a");
    let second = body
        .find("up{exported_instance=\"b\"} 1")
        .expect("sample from b");
    assert!(first < second, "samples out of declaration order:\n{body}");

    let _ = std::fs::remove_file(a);
    let _ = std::fs::remove_file(b);
}

#[tokio::test]
async fn failing_backends_do_not_fail_the_endpoint() {
    let good = temp_file("good", "foo 2\n");
    let config = RelayConfig {
        reverse_exporters: vec![endpoint_config(
            "/metrics",
            vec![
                file_exporter("good", &good),
                file_exporter("bad", std::path::Path::new("/nonexistent/metrics.prom")),
            ],
        )],
    };
    let registry = EndpointRegistry::from_config(&config).expect("registry");

    let (status, body) = get_body(registry.router(), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("foo{exported_instance=\"good\"} 2"));
    assert!(!body.contains("bad"));

    let _ = std::fs::remove_file(good);
}

#[tokio::test]
async fn slow_backends_are_dropped_at_the_deadline() {
    let fast = temp_file("fast", "quick 1\n");
    let mut endpoint = endpoint_config(
        "/metrics",
        vec![
            file_exporter("fast", &fast),
            ExporterConfig::Exec(metrics_relay::ExecExporterConfig {
                base: BaseExporterConfig {
                    name: "slow".to_string(),
                    no_rewrite: false,
                    labels: Default::default(),
                },
                command: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), "sleep 30; echo 'late 1'".to_string()],
            }),
        ],
    );
    endpoint.scrape_timeout = 0.2;
    let config = RelayConfig {
        reverse_exporters: vec![endpoint],
    };
    let registry = EndpointRegistry::from_config(&config).expect("registry");

    let (status, body) = get_body(registry.router(), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("quick{exported_instance=\"fast\"} 1"));
    assert!(!body.contains("late"));

    let _ = std::fs::remove_file(fast);
}

struct FixedProxy(Vec<MetricFamily>);

#[async_trait]
impl MetricProxy for FixedProxy {
    async fn scrape(&self, _params: &ScrapeParams) -> Result<Vec<MetricFamily>, ScrapeError> {
        Ok(self.0.clone())
    }
}

fn fixed_backend(name: &str, kind: MetricKind, value: f64) -> EndpointBackend {
    EndpointBackend {
        name: name.to_string(),
        proxy: std::sync::Arc::new(FixedProxy(vec![MetricFamily {
            name: "shared".to_string(),
            kind,
            help: None,
            samples: vec![Sample {
                name: "shared".to_string(),
                labels: Default::default(),
                value,
                timestamp_ms: None,
            }],
        }])),
    }
}

#[tokio::test]
async fn conflicting_family_types_return_500() {
    let endpoint = AggregatingEndpoint::new(
        "/metrics".to_string(),
        vec![
            fixed_backend("a", MetricKind::Gauge, 1.0),
            fixed_backend("b", MetricKind::Counter, 2.0),
        ],
        Duration::from_secs(5),
        None,
    );
    let registry = EndpointRegistry::from_endpoints(vec![endpoint]).expect("registry");

    let (status, body) = get_body(registry.router(), "/metrics").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("conflicting types"));
}

#[tokio::test]
async fn identical_label_sets_take_the_last_backend_value() {
    let endpoint = AggregatingEndpoint::new(
        "/metrics".to_string(),
        vec![
            fixed_backend("a", MetricKind::Gauge, 1.0),
            fixed_backend("b", MetricKind::Gauge, 9.0),
        ],
        Duration::from_secs(5),
        None,
    );
    let registry = EndpointRegistry::from_endpoints(vec![endpoint]).expect("registry");

    let (status, body) = get_body(registry.router(), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("shared 9\n"));
    assert!(!body.contains("shared 1\n"));
}

#[tokio::test]
async fn basic_auth_gates_the_endpoint() {
    let metrics = temp_file("authed", "up 1\n");
    let htpasswd = temp_file("htpasswd", "prom:{PLAIN}secret\n");

    let config = RelayConfig {
        reverse_exporters: vec![EndpointConfig {
            path: "/metrics".to_string(),
            auth_type: AuthType::Basic,
            htpasswd_file: Some(htpasswd.clone()),
            scrape_timeout: 5.0,
            exporters: vec![file_exporter("node", &metrics)],
        }],
    };
    let registry = EndpointRegistry::from_config(&config).expect("registry");

    let response = registry
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    use base64::Engine as _;
    let credentials = base64::engine::general_purpose::STANDARD.encode("prom:secret");
    let response = registry
        .router()
        .oneshot(
            Request::get("/metrics")
                .header(header::AUTHORIZATION, format!("Basic {credentials}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let _ = std::fs::remove_file(metrics);
    let _ = std::fs::remove_file(htpasswd);
}

#[tokio::test]
async fn reserved_label_misuse_registers_nothing() {
    let metrics = temp_file("reserved", "up 1\n");
    let config = RelayConfig {
        reverse_exporters: vec![
            endpoint_config("/fine", vec![file_exporter("ok", &metrics)]),
            endpoint_config(
                "/broken",
                vec![ExporterConfig::File(FileExporterConfig {
                    base: BaseExporterConfig {
                        name: "liar".to_string(),
                        no_rewrite: false,
                        labels: [(
                            "exported_instance".to_string(),
                            "someone-else".to_string(),
                        )]
                        .into_iter()
                        .collect(),
                    },
                    path: metrics.clone(),
                })],
            ),
        ],
    };

    assert!(EndpointRegistry::from_config(&config).is_err());
    let _ = std::fs::remove_file(metrics);
}

#[tokio::test]
async fn context_path_prefixes_every_endpoint() {
    let metrics = temp_file("ctx", "up 1\n");
    let config = RelayConfig {
        reverse_exporters: vec![endpoint_config(
            "/metrics",
            vec![file_exporter("node", &metrics)],
        )],
    };
    let registry = EndpointRegistry::from_config(&config).expect("registry");
    let router = registry.router_with_prefix("/relay");

    let (status, _) = get_body(router.clone(), "/relay/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get_body(router, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let _ = std::fs::remove_file(metrics);
}

mod http_backend {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use std::collections::HashMap;

    use metrics_relay::HttpExporterConfig;

    /// Serve a tiny exporter on an ephemeral port and return its base URL.
    async fn spawn_exporter(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn http_exporter(name: &str, address: String, forward: bool) -> ExporterConfig {
        ExporterConfig::Http(HttpExporterConfig {
            base: BaseExporterConfig {
                name: name.to_string(),
                no_rewrite: false,
                labels: Default::default(),
            },
            address,
            timeout: 2.0,
            forward_url_params: forward,
        })
    }

    #[tokio::test]
    async fn scrapes_remote_exporters_and_forwards_query_params() {
        let app = axum::Router::new().route(
            "/metrics",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let module = params.get("module").cloned().unwrap_or_default();
                format!("probe{{module=\"{module}\"}} 1\n")
            }),
        );
        let base = spawn_exporter(app).await;

        let config = RelayConfig {
            reverse_exporters: vec![endpoint_config(
                "/probe",
                vec![http_exporter("blackbox", format!("{base}/metrics"), true)],
            )],
        };
        let registry = EndpointRegistry::from_config(&config).expect("registry");

        let (status, body) = get_body(registry.router(), "/probe?module=icmp").await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            body.contains("probe{exported_instance=\"blackbox\",module=\"icmp\"} 1"),
            "unexpected body:\n{body}"
        );
    }

    #[tokio::test]
    async fn non_2xx_backends_contribute_nothing() {
        let app = axum::Router::new()
            .route("/bad", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
            .route("/good", get(|| async { "ok 1\n" }));
        let base = spawn_exporter(app).await;

        let config = RelayConfig {
            reverse_exporters: vec![endpoint_config(
                "/metrics",
                vec![
                    http_exporter("good", format!("{base}/good"), false),
                    http_exporter("bad", format!("{base}/bad"), false),
                ],
            )],
        };
        let registry = EndpointRegistry::from_config(&config).expect("registry");

        let (status, body) = get_body(registry.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ok{exported_instance=\"good\"} 1"));
        assert!(!body.contains("boom"));
    }
}

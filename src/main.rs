use gangway::config::{Args, GatewayConfig};
use gangway::metrics::TracingMetricsSink;
use gangway::schema_registry::FileSchemaSource;
use gangway::{
    FederatedQueryPlanner, FederationGateway, GraphQLError, GraphQLRequest, GraphQLResponse,
    HttpTransport, InMemorySchemaRegistry, PlanExecutor,
};

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Request headers forwarded to subgraphs.
const FORWARDED_HEADERS: [&str; 3] = ["authorization", "x-api-key", "x-token"];

// Create a response body from a string
fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - Gangway Federation Gateway</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    const token = localStorage.getItem('auth_token') || '';

    function graphQLFetcher(graphQLParams) {
      return fetch('/graphql', {
        method: 'post',
        headers: {
          'Content-Type': 'application/json',
          'Authorization': token ? `Bearer ${token}` : '',
        },
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<FederationGateway>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let auth_headers = extract_auth_headers(&req);

    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => {
                    return Ok(text_response(
                        StatusCode::BAD_REQUEST,
                        "Failed to read request body",
                    ));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(mut graphql_req) => {
                    graphql_req.auth_headers = auth_headers;

                    // Dropping this future (client went away) cancels the
                    // execution and every in-flight subgraph fetch.
                    let cancellation = CancellationToken::new();
                    let _guard = cancellation.clone().drop_guard();
                    let response = gateway.process_request(graphql_req, cancellation).await;
                    json_response(StatusCode::OK, &response)
                }
                Err(e) => json_response(
                    StatusCode::BAD_REQUEST,
                    &GraphQLResponse::error(GraphQLError::new(
                        format!("Invalid JSON request: {}", e),
                        "BAD_REQUEST",
                    )),
                ),
            }
        }

        (&Method::GET, "/graphiql") => Response::builder()
            .header("Content-Type", "text/html")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(GRAPHIQL_HTML))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/health") => match gateway.supergraph().await {
            Ok(_) => text_response(StatusCode::OK, r#"{"status":"ok"}"#),
            Err(_) => text_response(StatusCode::SERVICE_UNAVAILABLE, r#"{"status":"unavailable"}"#),
        },

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header("Location", "/graphiql")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type, Authorization, x-api-key, x-token",
            )
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(result)
}

fn json_response(
    status: StatusCode,
    body: &GraphQLResponse,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| {
        json!({"errors": [{"message": "failed to serialize response"}]}).to_string()
    });
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full(json))
        .unwrap_or_else(|_| internal_server_error())
}

fn text_response(status: StatusCode, body: &'static str) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", "*")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

// Create a standard internal server error response
fn internal_server_error() -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

// Extract the headers propagated to subgraphs
fn extract_auth_headers(req: &Request<Incoming>) -> HashMap<String, String> {
    let mut auth_headers = HashMap::new();
    for header_name in FORWARDED_HEADERS {
        if let Some(header_value) = req.headers().get(header_name) {
            if let Ok(value_str) = header_value.to_str() {
                auth_headers.insert(header_name.to_string(), value_str.to_string());
            }
        }
    }
    auth_headers
}

#[derive(Clone)]
// An Executor that uses the tokio runtime.
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

/// Periodically reloads the schema source. Failures keep the current
/// supergraph.
fn spawn_schema_poller(gateway: Arc<FederationGateway>, source: Arc<FileSchemaSource>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = gateway.load_schemas(source.as_ref()).await {
                warn!(error = %e, "schema reload failed, keeping the current supergraph");
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gangway=info")),
        )
        .compact()
        .init();

    let args = Args::parse();
    let mut config = GatewayConfig::load(&args.config)?;
    config.apply_args(&args);

    let schema_registry = Box::new(InMemorySchemaRegistry::new());
    let query_planner = Box::new(FederatedQueryPlanner::new());
    let query_executor = Box::new(PlanExecutor::new(
        Arc::new(HttpTransport::new()),
        config.executor_config(),
    ));

    let gateway = Arc::new(
        FederationGateway::new(schema_registry, query_planner, query_executor)
            .with_metrics(Arc::new(TracingMetricsSink))
            .with_request_timeout(config.request_timeout()),
    );

    let source = Arc::new(FileSchemaSource::new(args.config.clone()));
    if let Err(e) = gateway.load_schemas(source.as_ref()).await {
        error!(error = %e, "failed to load schemas");
        return Err(e.into());
    }
    if let Some(every) = config.poll_interval() {
        info!(seconds = every.as_secs(), "polling schema source");
        spawn_schema_poller(gateway.clone(), source, every);
    }

    let addr: SocketAddr = config.listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("GraphQL Federation Gateway starting on http://{}", addr);
    info!("GraphiQL UI available at http://{}/graphiql", addr);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let gateway_clone = Arc::clone(&gateway);

        let executor = TokioExecutor;

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let gateway = gateway_clone.clone();
                handle_request(req, gateway)
            });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(executor)
                .serve_connection(io, service)
                .await
            {
                warn!(error = %e, "error processing connection");
            }
        });
    }
}

//! HTTP surface: an HTML lookup page and a JSON endpoint.
//!
//! Outbound calls use blocking clients, so every request runs its pipeline
//! on the blocking thread pool with freshly built clients.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::Html,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::pipeline::{Generated, LiveServices, Outcome, Rejection};
use crate::quickstatements::BIBLIOGRAPHY_URL;

/// Shown when the query string itself cannot be decoded, e.g. a repeated key.
const MALFORMED_QUERY: &str = "Invalid id provided.";

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/quickstatements", get(api_quickstatements))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the server
pub async fn serve(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("bhl2wd listening on http://{}", addr);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexQuery {
    #[serde(default)]
    pub bhl: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiQuery {
    #[serde(default)]
    pub id: String,
}

/// JSON body of `/api/quickstatements`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ApiBody {
    Script { quickstatements: String },
    Error { error: String },
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn api_quickstatements(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ApiQuery>, QueryRejection>,
) -> (StatusCode, Json<ApiBody>) {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            info!("malformed query string: {rejection}");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiBody::Error {
                    error: MALFORMED_QUERY.to_string(),
                }),
            );
        }
    };
    match run_pipeline(&state.config, query.id).await {
        Ok(outcome) => {
            let (status, body) = api_response(&outcome);
            (status, Json(body))
        }
        Err(err) => {
            error!("request failed: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiBody::Error {
                    error: "Request failed.".to_string(),
                }),
            )
        }
    }
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    query: Result<Query<IndexQuery>, QueryRejection>,
) -> Html<String> {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            info!("malformed query string: {rejection}");
            return Html(render_page("", PageView::Failure(MALFORMED_QUERY)));
        }
    };
    let input = query.bhl.trim().to_string();
    if input.is_empty() {
        return Html(render_page("", PageView::Form));
    }
    match run_pipeline(&state.config, input.clone()).await {
        Ok(outcome) => Html(render_page(&input, PageView::Outcome(&outcome))),
        Err(err) => {
            error!("request failed: {err:#}");
            Html(render_page(
                &input,
                PageView::Failure("The request could not be completed. Please try again."),
            ))
        }
    }
}

async fn run_pipeline(config: &AppConfig, input: String) -> Result<Outcome> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        let services = LiveServices::connect(&config)?;
        Ok(services.pipeline().run(&input))
    })
    .await
    .context("pipeline task did not complete")?
}

pub fn rejection_status(rejection: &Rejection) -> StatusCode {
    match rejection {
        Rejection::NotFound { .. } => StatusCode::NOT_FOUND,
        Rejection::Input(_) | Rejection::Duplicate(_) => StatusCode::BAD_REQUEST,
    }
}

pub fn api_response(outcome: &Outcome) -> (StatusCode, ApiBody) {
    match outcome {
        Outcome::Generated(generated) => (
            StatusCode::OK,
            ApiBody::Script {
                quickstatements: generated.quickstatements(),
            },
        ),
        Outcome::Rejected(rejection) => (
            rejection_status(rejection),
            ApiBody::Error {
                error: rejection.to_string(),
            },
        ),
    }
}

pub enum PageView<'a> {
    Form,
    Outcome(&'a Outcome),
    Failure(&'a str),
}

pub fn render_page(input: &str, view: PageView<'_>) -> String {
    let body = match view {
        PageView::Form => String::new(),
        PageView::Failure(message) => render_error(message),
        PageView::Outcome(Outcome::Rejected(Rejection::Duplicate(item))) => format!(
            "{}\n<p>Existing item: <a href=\"{}\">{} ({})</a></p>",
            render_error(&format!(
                "Item already exists: {} ({}). Please check the item on Wikidata.",
                item.label, item.qid
            )),
            escape_html(&item.url()),
            escape_html(&item.label),
            escape_html(&item.qid)
        ),
        PageView::Outcome(Outcome::Rejected(rejection)) => render_error(&rejection.to_string()),
        PageView::Outcome(Outcome::Generated(generated)) => render_generated(generated),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>BHL title to Wikidata</title>
</head>
<body>
<h1>BHL title to Wikidata</h1>
<form method="get" action="/">
<label for="bhl">BHL title ID, DOI, or URL</label>
<input id="bhl" name="bhl" type="text" size="60" value="{}">
<button type="submit">Generate</button>
</form>
{}
</body>
</html>
"#,
        escape_html(input),
        body
    )
}

fn render_error(message: &str) -> String {
    format!("<p class=\"error\">{}</p>", escape_html(message))
}

fn render_generated(generated: &Generated) -> String {
    let metadata = &generated.metadata;
    let mut html = vec![
        format!("<h2>{}</h2>", escape_html(&metadata.full_title)),
        format!(
            "<p>BHL title <a href=\"{}\">{}</a></p>",
            escape_html(&format!("{BIBLIOGRAPHY_URL}{}", metadata.title_id)),
            escape_html(&metadata.title_id)
        ),
    ];

    if !metadata.authors.is_empty() {
        html.push("<h3>Authors</h3>\n<ul>".to_string());
        for author in &metadata.authors {
            html.push(format!(
                "<li>{} (BHL creator {})</li>",
                escape_html(&author.name),
                escape_html(&author.author_id)
            ));
        }
        html.push("</ul>".to_string());
    }
    if !metadata.identifiers.is_empty() {
        html.push("<h3>Identifiers</h3>\n<ul>".to_string());
        for identifier in &metadata.identifiers {
            html.push(format!(
                "<li>{}: {}</li>",
                escape_html(&identifier.name),
                escape_html(&identifier.value)
            ));
        }
        html.push("</ul>".to_string());
    }
    if !generated.script.diagnostics().is_empty() {
        html.push("<h3>Authors without a Wikidata item</h3>\n<ul>".to_string());
        for note in generated.script.diagnostics() {
            html.push(format!("<li>{}</li>", escape_html(note)));
        }
        html.push("</ul>".to_string());
    }

    let quickstatements = generated.quickstatements();
    html.push("<h3>QuickStatements</h3>".to_string());
    html.push(format!(
        "<textarea rows=\"{}\" cols=\"100\" readonly>{}</textarea>",
        generated.script.lines().len().max(4),
        escape_html(&quickstatements)
    ));
    html.push(format!(
        "<p><a href=\"{}\">Open in QuickStatements</a></p>",
        escape_html(&generated.quickstatements_url())
    ));
    html.join("\n")
}

fn escape_html(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&#39;"),
            _ => output.push(ch),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use mockito::{Matcher, Server};
    use tower::ServiceExt;

    use super::{ApiBody, AppState, PageView, api_response, create_router, render_page};
    use crate::bhl::{Author, TitleMetadata};
    use crate::config::AppConfig;
    use crate::identifier::TitleId;
    use crate::pipeline::{Generated, Outcome, Rejection};
    use crate::quickstatements::CommandScript;
    use crate::wikidata::{
        ExistingItem, PROP_BHL_CREATOR_ID, entity_lookup_query, existing_item_query,
    };

    fn offline_state() -> Arc<AppState> {
        Arc::new(AppState::new(AppConfig::for_base_url("http://127.0.0.1:9")))
    }

    async fn get(uri: &str) -> (StatusCode, String) {
        get_with(offline_state(), uri).await
    }

    async fn get_with(state: Arc<AppState>, uri: &str) -> (StatusCode, String) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    fn generated() -> Outcome {
        Outcome::Generated(Box::new(Generated {
            metadata: TitleMetadata {
                full_title: "Flora <of> Nowhere".to_string(),
                title_id: "999".to_string(),
                identifiers: Vec::new(),
                authors: vec![Author {
                    author_id: "7".to_string(),
                    name: "A. Nonymous".to_string(),
                }],
            },
            script: CommandScript::default(),
        }))
    }

    #[tokio::test]
    async fn api_requires_id() {
        let (status, body) = get("/api/quickstatements").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, r#"{"error":"No id provided."}"#);
    }

    #[tokio::test]
    async fn api_rejects_unparseable_and_foreign_ids() {
        let (status, body) = get("/api/quickstatements?id=no-digits-here").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, r#"{"error":"Invalid id provided."}"#);

        let (status, body) = get("/api/quickstatements?id=10.1038%2Fnature12373").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("not a Biodiversity Heritage Library DOI"));
    }

    #[tokio::test]
    async fn malformed_query_string_gets_error_body() {
        let (status, body) = get("/api/quickstatements?id=1&id=2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, r#"{"error":"Invalid id provided."}"#);

        let (status, body) = get("/?bhl=1&bhl=2").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<p class=\"error\">Invalid id provided.</p>"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn index_generates_statements_from_live_services() {
        let title_id = TitleId::parse("687").expect("id");
        let mut server = Server::new_async().await;
        let existing = server
            .mock("GET", "/sparql")
            .match_query(Matcher::UrlEncoded(
                "query".to_string(),
                existing_item_query(&title_id),
            ))
            .with_status(200)
            .with_body(r#"{"results": {"bindings": []}}"#)
            .expect(1)
            .create_async()
            .await;
        let creator = server
            .mock("GET", "/sparql")
            .match_query(Matcher::UrlEncoded(
                "query".to_string(),
                entity_lookup_query(PROP_BHL_CREATOR_ID, "8451").expect("query"),
            ))
            .with_status(200)
            .with_body(
                r#"{"results": {"bindings": [
                    {"item": {"type": "uri", "value": "http://www.wikidata.org/entity/Q42"}}
                ]}}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let bhl = server
            .mock("GET", "/api3")
            .match_query(Matcher::UrlEncoded("id".to_string(), "687".to_string()))
            .with_status(200)
            .with_body(
                r#"{"Status": "ok", "Result": [{
                    "TitleID": 687,
                    "FullTitle": "Proceedings of the Zoological Society of London.",
                    "Authors": [{"AuthorID": 8451, "Name": "Zoological Society of London"}]
                }]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let state = Arc::new(AppState::new(AppConfig::for_base_url(&server.url())));
        let (status, body) = get_with(state, "/?bhl=10.5962%2Fbhl.title.687").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<h2>Proceedings of the Zoological Society of London.</h2>"));
        assert!(body.contains("LAST|P50|Q42|"));
        assert!(body.contains("Open in QuickStatements"));
        existing.assert_async().await;
        creator.assert_async().await;
        bhl.assert_async().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn index_links_existing_item_without_fetching() {
        let mut server = Server::new_async().await;
        let sparql = server
            .mock("GET", "/sparql")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"results": {"bindings": [
                    {"item": {"type": "uri", "value": "http://www.wikidata.org/entity/Q9"},
                     "itemLabel": {"type": "literal", "value": "Flora & Fauna"}}
                ]}}"#,
            )
            .create_async()
            .await;
        let bhl = server
            .mock("GET", "/api3")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let state = Arc::new(AppState::new(AppConfig::for_base_url(&server.url())));
        let (status, body) = get_with(state, "/?bhl=9").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Item already exists: Flora &amp; Fauna (Q9)."));
        assert!(body.contains("href=\"https://www.wikidata.org/wiki/Q9\""));
        sparql.assert_async().await;
        bhl.assert_async().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn api_reports_failed_fetch_as_not_found() {
        let mut server = Server::new_async().await;
        let _sparql = server
            .mock("GET", "/sparql")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"results": {"bindings": []}}"#)
            .create_async()
            .await;
        let bhl = server
            .mock("GET", "/api3")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let state = Arc::new(AppState::new(AppConfig::for_base_url(&server.url())));
        let (status, body) = get_with(state, "/api/quickstatements?id=5").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, r#"{"error":"No metadata found for this BHL Title ID."}"#);
        bhl.assert_async().await;
    }

    #[tokio::test]
    async fn index_without_input_renders_form() {
        let (status, body) = get("/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("name=\"bhl\""));
        assert!(!body.contains("class=\"error\""));
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let (status, body) = get("/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[test]
    fn api_response_maps_rejections_to_statuses() {
        let duplicate = Outcome::Rejected(Rejection::Duplicate(ExistingItem {
            qid: "Q123".to_string(),
            label: "Flora".to_string(),
        }));
        assert_eq!(
            api_response(&duplicate),
            (
                StatusCode::BAD_REQUEST,
                ApiBody::Error {
                    error: "Item already exists: Flora (Q123).".to_string()
                }
            )
        );

        let missing = Outcome::Rejected(Rejection::NotFound {
            title_id: TitleId::parse("5").expect("id"),
        });
        assert_eq!(
            api_response(&missing),
            (
                StatusCode::NOT_FOUND,
                ApiBody::Error {
                    error: "No metadata found for this BHL Title ID.".to_string()
                }
            )
        );

        let (status, body) = api_response(&generated());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::to_string(&body).expect("json"),
            r#"{"quickstatements":""}"#
        );
    }

    #[test]
    fn page_escapes_and_links_existing_item() {
        let duplicate = Outcome::Rejected(Rejection::Duplicate(ExistingItem {
            qid: "Q123".to_string(),
            label: "Flora & Fauna".to_string(),
        }));
        let html = render_page("\"><script>", PageView::Outcome(&duplicate));
        assert!(html.contains("value=\"&quot;&gt;&lt;script&gt;\""));
        assert!(html.contains("href=\"https://www.wikidata.org/wiki/Q123\""));
        assert!(html.contains("Flora &amp; Fauna (Q123). Please check the item on Wikidata."));
    }

    #[test]
    fn page_shows_generated_title() {
        let html = render_page("999", PageView::Outcome(&generated()));
        assert!(html.contains("<h2>Flora &lt;of&gt; Nowhere</h2>"));
        assert!(html.contains("https://www.biodiversitylibrary.org/bibliography/999"));
        assert!(html.contains("A. Nonymous (BHL creator 7)"));
        assert!(html.contains("Open in QuickStatements"));
    }
}

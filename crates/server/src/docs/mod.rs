//! Document and asset HTTP handlers.
//!
//! Composes the access policy store and the confined path resolver:
//! listings enumerate accessible documents newest-first, single documents
//! are rendered through the external markdown renderer, and image assets
//! are served raw with caching headers.

pub mod resolve;

use std::path::Path;
use std::time::SystemTime;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use chrono::{DateTime, Utc};
use pulldown_cmark::{html, Options, Parser};
use serde::Deserialize;
use tracing::warn;

use crate::access::AccessRules;
use crate::config::AppState;
use crate::docs::resolve::{ASSET_EXTENSIONS, DOC_EXTENSIONS};

/// One listable document, derived transiently from directory enumeration.
#[derive(Debug, Clone)]
pub struct DocumentEntry {
    pub slug: String,
    pub title: String,
    pub modified: SystemTime,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Token from `Authorization: Bearer` or the `token` query parameter.
fn request_token(headers: &HeaderMap, query: &TokenQuery) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| {
            raw.strip_prefix("Bearer ")
                .or_else(|| raw.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned);
    from_header.or_else(|| {
        query
            .token
            .as_ref()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Enumerate accessible documents, sorted descending by modification time.
/// Ties break by slug so repeated listings are deterministic.
pub async fn collect_entries(
    root: &Path,
    rules: &AccessRules,
    token: Option<&str>,
) -> anyhow::Result<Vec<DocumentEntry>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(root).await?;

    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(slug) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !rules.can_access(slug, token) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        entries.push(DocumentEntry {
            slug: slug.to_string(),
            title: title_from_slug(slug),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.slug.cmp(&b.slug)));
    Ok(entries)
}

fn title_from_slug(slug: &str) -> String {
    slug.replace(['-', '_'], " ")
}

/// GET / — list accessible documents.
pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    let token = request_token(&headers, &query);
    let rules = AccessRules::load(
        &state.config.access_file,
        state.config.access_fail_closed,
    )
    .await;

    let entries = match collect_entries(&state.config.docs_dir, &rules, token.as_deref()).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("[Docs] Could not enumerate documents: {}", e);
            Vec::new()
        }
    };

    Html(render_listing(&entries, token.as_deref())).into_response()
}

/// GET /{name} — a rendered document, or a raw asset when the extension is
/// on the image allow-list.
pub async fn serve_entry(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    if resolve::name_is_malformed(&name) {
        return not_found();
    }
    let token = request_token(&headers, &query);

    let is_asset = Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| ASSET_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false);

    if is_asset {
        serve_asset(&state, &name, token.as_deref()).await
    } else {
        serve_document(&state, &name, token.as_deref()).await
    }
}

async fn serve_document(state: &AppState, slug: &str, token: Option<&str>) -> Response {
    let rules = AccessRules::load(
        &state.config.access_file,
        state.config.access_fail_closed,
    )
    .await;
    if !rules.can_access(slug, token) {
        return unauthorized();
    }

    let file_name = format!("{}.md", slug);
    let path = match resolve::resolve(&state.config.docs_dir, &file_name, DOC_EXTENSIONS).await {
        Ok(path) => path,
        Err(_) => return not_found(),
    };

    let markdown = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) => {
            warn!("[Docs] Could not read {:?}: {}", path, e);
            return not_found();
        }
    };

    Html(page_shell(&title_from_slug(slug), &markdown_to_html(&markdown))).into_response()
}

async fn serve_asset(state: &AppState, name: &str, token: Option<&str>) -> Response {
    // Assets share the document policy keyspace by file stem.
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);

    let rules = AccessRules::load(
        &state.config.access_file,
        state.config.access_fail_closed,
    )
    .await;
    if !rules.can_access(stem, token) {
        return unauthorized();
    }

    let path = match resolve::resolve(&state.config.docs_dir, name, ASSET_EXTENSIONS).await {
        Ok(path) => path,
        Err(_) => return not_found(),
    };

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("[Docs] Could not read asset {:?}: {}", path, e);
            return not_found();
        }
    };

    let content_type = content_type_for(name);
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        bytes,
    )
        .into_response()
}

fn content_type_for(name: &str) -> &'static str {
    match Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn unauthorized() -> Response {
    // Uniform denial: never reveals whether the slug exists.
    (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

/// The external renderer boundary: markdown text in, HTML fragment out.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_FOOTNOTES);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// Escape text for HTML text and attribute positions. The token and slugs
/// are caller-influenced, so nothing goes into the page raw.
fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode a query value; everything outside the unreserved set.
fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn render_listing(entries: &[DocumentEntry], token: Option<&str>) -> String {
    let mut items = String::new();
    for entry in entries {
        let date: DateTime<Utc> = entry.modified.into();
        let href = match token {
            Some(token) => format!("/{}?token={}", urlencode(&entry.slug), urlencode(token)),
            None => format!("/{}", urlencode(&entry.slug)),
        };
        items.push_str(&format!(
            "<li><a href=\"{}\">{}</a> <small>{}</small></li>\n",
            html_escape(&href),
            html_escape(&entry.title),
            date.format("%Y-%m-%d")
        ));
    }
    page_shell("Documents", &format!("<ul>\n{}</ul>", items))
}

fn page_shell(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{}</title></head>\n<body><main>{}</main></body></html>\n",
        html_escape(title),
        body
    )
}

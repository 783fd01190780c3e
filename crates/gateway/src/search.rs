use std::env;

use serde::Serialize;
use tracing::warn;
use url::Url;

const SEARCH_URL: &str = "https://serpapi.com/search.json";
const MAX_HITS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Optional web research for chat turns that request it. Every failure is
/// soft: the turn simply proceeds without web context.
#[derive(Clone)]
pub struct SerpApiClient {
    client: reqwest::Client,
    api_key: String,
}

impl SerpApiClient {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }

    pub fn from_env(client: reqwest::Client) -> Option<Self> {
        let api_key = env::var("SERP_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        Some(Self::new(client, api_key))
    }

    pub async fn search(&self, query: &str) -> Vec<SearchHit> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let mut url = match Url::parse(SEARCH_URL) {
            Ok(url) => url,
            Err(_) => return Vec::new(),
        };
        url.query_pairs_mut()
            .append_pair("engine", "google")
            .append_pair("q", query)
            .append_pair("hl", "de")
            .append_pair("api_key", &self.api_key);

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "web search request failed");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "web search returned non-success status");
            return Vec::new();
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "web search response unreadable");
                return Vec::new();
            }
        };

        parse_organic_results(&body)
    }
}

fn parse_organic_results(body: &serde_json::Value) -> Vec<SearchHit> {
    body.get("organic_results")
        .and_then(|value| value.as_array())
        .map(|results| {
            results
                .iter()
                .filter_map(|result| {
                    let title = result.get("title")?.as_str()?;
                    let link = result.get("link")?.as_str()?;
                    let snippet = result
                        .get("snippet")
                        .and_then(|value| value.as_str())
                        .unwrap_or_default();
                    Some(SearchHit {
                        title: title.to_string(),
                        link: link.to_string(),
                        snippet: snippet.to_string(),
                    })
                })
                .take(MAX_HITS)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organic_results_are_limited_and_tolerate_missing_snippets() {
        let body = serde_json::json!({
            "organic_results": [
                { "title": "A", "link": "https://a.example" },
                { "title": "B", "link": "https://b.example", "snippet": "b" },
                { "title": "C", "link": "https://c.example", "snippet": "c" },
                { "title": "D", "link": "https://d.example", "snippet": "d" }
            ]
        });
        let hits = parse_organic_results(&body);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].snippet, "");
    }

    #[test]
    fn missing_results_yield_empty() {
        assert!(parse_organic_results(&serde_json::json!({})).is_empty());
    }
}

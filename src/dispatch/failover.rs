//! Attempt-sequence construction for the four route policies
//! (`k`/`m`/`km`/`mk`) plus the `backend:model` single-route and
//! one-off-route special cases.

use crate::config::{BackendConfig, FailoverRouteConfig, RoutePolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSpec {
    pub backend: String,
    pub model: String,
    pub key_name: String,
}

/// Expand a route into its ordered attempt sequence. `backends` is
/// keyed by backend name, giving each element's ordered key list.
pub fn expand_route(
    route: &FailoverRouteConfig,
    backends: &std::collections::HashMap<String, BackendConfig>,
) -> Vec<AttemptSpec> {
    match route.policy {
        RoutePolicy::K => {
            let Some(element) = route.elements.first() else {
                return Vec::new();
            };
            keys_for(backends, &element.backend)
                .into_iter()
                .map(|key_name| AttemptSpec {
                    backend: element.backend.clone(),
                    model: element.model.clone(),
                    key_name,
                })
                .collect()
        }
        RoutePolicy::M => route
            .elements
            .iter()
            .filter_map(|element| {
                keys_for(backends, &element.backend).into_iter().next().map(|key_name| AttemptSpec {
                    backend: element.backend.clone(),
                    model: element.model.clone(),
                    key_name,
                })
            })
            .collect(),
        RoutePolicy::Km => route
            .elements
            .iter()
            .flat_map(|element| {
                keys_for(backends, &element.backend)
                    .into_iter()
                    .map(move |key_name| AttemptSpec {
                        backend: element.backend.clone(),
                        model: element.model.clone(),
                        key_name,
                    })
            })
            .collect(),
        // Round-robin across elements by their k-th key, k = 0..max(keys_len)-1
        // (open question resolved in SPEC_FULL.md §9: elements with fewer
        // keys than the current round are skipped for that round, not
        // wrapped, so a short-keyed backend contributes fewer attempts
        // overall rather than repeating a key).
        RoutePolicy::Mk => {
            let key_lists: Vec<Vec<String>> = route
                .elements
                .iter()
                .map(|element| keys_for(backends, &element.backend))
                .collect();
            let max_keys = key_lists.iter().map(Vec::len).max().unwrap_or(0);
            let mut attempts = Vec::new();
            for k in 0..max_keys {
                for (element, keys) in route.elements.iter().zip(&key_lists) {
                    if let Some(key_name) = keys.get(k) {
                        attempts.push(AttemptSpec {
                            backend: element.backend.clone(),
                            model: element.model.clone(),
                            key_name: key_name.clone(),
                        });
                    }
                }
            }
            attempts
        }
    }
}

/// `backend:model` literal (not a route name): single element, all keys
/// in order.
pub fn expand_single(
    backend: &str,
    model: &str,
    backends: &std::collections::HashMap<String, BackendConfig>,
) -> Vec<AttemptSpec> {
    keys_for(backends, backend)
        .into_iter()
        .map(|key_name| AttemptSpec {
            backend: backend.to_string(),
            model: model.to_string(),
            key_name,
        })
        .collect()
}

fn keys_for(backends: &std::collections::HashMap<String, BackendConfig>, backend: &str) -> Vec<String> {
    backends
        .get(backend)
        .map(|cfg| cfg.api_keys.iter().map(|k| k.name.clone()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKeyConfig, RouteElement};

    fn backend_with_keys(names: &[&str]) -> BackendConfig {
        BackendConfig {
            kind: "openai".into(),
            api_url: "https://api.openai.com/v1".into(),
            api_keys: names
                .iter()
                .map(|n| BackendKeyConfig {
                    name: n.to_string(),
                    secret: format!("secret-{n}"),
                })
                .collect(),
            project_id: None,
            oauth_credentials_path: None,
        }
    }

    #[test]
    fn k_policy_iterates_all_keys_of_first_element() {
        let mut backends = std::collections::HashMap::new();
        backends.insert("openai".to_string(), backend_with_keys(&["k1", "k2", "k3"]));
        let route = FailoverRouteConfig {
            policy: RoutePolicy::K,
            elements: vec![RouteElement {
                backend: "openai".into(),
                model: "gpt-4".into(),
            }],
        };
        let attempts = expand_route(&route, &backends);
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.backend == "openai" && a.model == "gpt-4"));
    }

    #[test]
    fn m_policy_uses_first_key_per_element() {
        let mut backends = std::collections::HashMap::new();
        backends.insert("openai".to_string(), backend_with_keys(&["k1", "k2"]));
        backends.insert("anthropic".to_string(), backend_with_keys(&["a1"]));
        let route = FailoverRouteConfig {
            policy: RoutePolicy::M,
            elements: vec![
                RouteElement { backend: "openai".into(), model: "gpt-4".into() },
                RouteElement { backend: "anthropic".into(), model: "claude".into() },
            ],
        };
        let attempts = expand_route(&route, &backends);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].key_name, "k1");
        assert_eq!(attempts[1].key_name, "a1");
    }

    #[test]
    fn km_policy_is_full_cross_product() {
        let mut backends = std::collections::HashMap::new();
        backends.insert("openai".to_string(), backend_with_keys(&["k1", "k2"]));
        backends.insert("anthropic".to_string(), backend_with_keys(&["a1", "a2"]));
        let route = FailoverRouteConfig {
            policy: RoutePolicy::Km,
            elements: vec![
                RouteElement { backend: "openai".into(), model: "gpt-4".into() },
                RouteElement { backend: "anthropic".into(), model: "claude".into() },
            ],
        };
        let attempts = expand_route(&route, &backends);
        assert_eq!(attempts.len(), 4);
    }

    #[test]
    fn mk_policy_round_robins_by_key_index() {
        let mut backends = std::collections::HashMap::new();
        backends.insert("openai".to_string(), backend_with_keys(&["k1", "k2"]));
        backends.insert("anthropic".to_string(), backend_with_keys(&["a1"]));
        let route = FailoverRouteConfig {
            policy: RoutePolicy::Mk,
            elements: vec![
                RouteElement { backend: "openai".into(), model: "gpt-4".into() },
                RouteElement { backend: "anthropic".into(), model: "claude".into() },
            ],
        };
        let attempts = expand_route(&route, &backends);
        // round 0: openai/k1, anthropic/a1; round 1: openai/k2 only
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].key_name, "k1");
        assert_eq!(attempts[1].key_name, "a1");
        assert_eq!(attempts[2].key_name, "k2");
    }
}

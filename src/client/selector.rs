//! # Label Selectors
//!
//! Matching and string rendering for `LabelSelector`, shared by the Kubernetes
//! store (list queries) and the in-memory store (client-side filtering).

use super::ClientError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

/// Render a selector in the `a=b,c in (d,e),!f` form accepted by list calls
///
/// # Errors
///
/// Returns `ClientError::InvalidSelector` for unknown operators or malformed requirements.
pub fn selector_to_string(selector: &LabelSelector) -> Result<String, ClientError> {
    let mut parts = Vec::new();
    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            parts.push(format!("{key}={value}"));
        }
    }
    for req in selector.match_expressions.iter().flatten() {
        parts.push(requirement_to_string(req)?);
    }
    Ok(parts.join(","))
}

fn requirement_to_string(req: &LabelSelectorRequirement) -> Result<String, ClientError> {
    let values = req.values.clone().unwrap_or_default();
    match req.operator.as_str() {
        "In" | "NotIn" if values.is_empty() => Err(ClientError::InvalidSelector(format!(
            "operator {} on key {} requires values",
            req.operator, req.key
        ))),
        "In" => Ok(format!("{} in ({})", req.key, values.join(","))),
        "NotIn" => Ok(format!("{} notin ({})", req.key, values.join(","))),
        "Exists" => Ok(req.key.clone()),
        "DoesNotExist" => Ok(format!("!{}", req.key)),
        other => Err(ClientError::InvalidSelector(format!(
            "unknown operator {other} on key {}",
            req.key
        ))),
    }
}

/// Whether `labels` satisfy `selector`
///
/// An empty selector matches everything.
///
/// # Errors
///
/// Returns `ClientError::InvalidSelector` for unknown operators.
pub fn selector_matches(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> Result<bool, ClientError> {
    if let Some(required) = &selector.match_labels {
        if required.iter().any(|(k, v)| labels.get(k) != Some(v)) {
            return Ok(false);
        }
    }
    for req in selector.match_expressions.iter().flatten() {
        let values = req.values.as_deref().unwrap_or_default();
        let actual = labels.get(&req.key);
        let matched = match req.operator.as_str() {
            "In" => actual.is_some_and(|v| values.contains(v)),
            "NotIn" => actual.is_none_or(|v| !values.contains(v)),
            "Exists" => actual.is_some(),
            "DoesNotExist" => actual.is_none(),
            other => {
                return Err(ClientError::InvalidSelector(format!(
                    "unknown operator {other} on key {}",
                    req.key
                )))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Selector matching exactly the given labels
#[must_use]
pub fn selector_from_labels<I, K, V>(labels: I) -> LabelSelector
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    LabelSelector {
        match_labels: Some(
            labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ),
        match_expressions: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_match_labels_and_expressions() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("app", "game")])),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "zone".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["a".to_string(), "b".to_string()]),
            }]),
        };
        assert!(selector_matches(&selector, &labels(&[("app", "game"), ("zone", "a")])).unwrap());
        assert!(!selector_matches(&selector, &labels(&[("app", "game"), ("zone", "c")])).unwrap());
        assert!(!selector_matches(&selector, &labels(&[("zone", "a")])).unwrap());
        assert_eq!(
            selector_to_string(&selector).unwrap(),
            "app=game,zone in (a,b)"
        );
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(selector_matches(&selector, &BTreeMap::new()).unwrap());
        assert_eq!(selector_to_string(&selector).unwrap(), "");
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "app".to_string(),
                operator: "Near".to_string(),
                values: None,
            }]),
        };
        assert!(matches!(
            selector_matches(&selector, &BTreeMap::new()),
            Err(ClientError::InvalidSelector(_))
        ));
        assert!(selector_to_string(&selector).is_err());
    }
}

//! SPARQL 1.1 Query Results JSON Format

use std::collections::BTreeMap;

use serde::Deserialize;

use hkq_core::{BindingRow, BindingSet, BindingValue, StoreError};

/// Media type requested from the endpoint
pub const RESULTS_JSON: &str = "application/sparql-results+json";

#[derive(Debug, Deserialize)]
struct ResultsDocument {
    head: Head,
    results: Option<Results>,
}

#[derive(Debug, Deserialize)]
struct Head {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Results {
    bindings: Vec<BTreeMap<String, Term>>,
}

#[derive(Debug, Deserialize)]
struct Term {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(default)]
    datatype: Option<String>,
    #[serde(rename = "xml:lang", default)]
    lang: Option<String>,
}

impl Term {
    fn into_binding(self) -> Result<BindingValue, StoreError> {
        match self.kind.as_str() {
            "uri" => Ok(BindingValue::Iri { value: self.value }),
            // "typed-literal" is the SPARQL 1.0 spelling still sent by some stores
            "literal" | "typed-literal" => Ok(BindingValue::Literal {
                value: self.value,
                datatype: self.datatype,
                language: self.lang,
            }),
            "bnode" => Ok(BindingValue::Blank { value: self.value }),
            other => Err(StoreError::InvalidResponse(format!(
                "unknown term type '{other}'"
            ))),
        }
    }
}

/// Parse a SELECT response body into a binding set
pub fn parse_results(body: &[u8]) -> Result<BindingSet, StoreError> {
    let document: ResultsDocument = serde_json::from_slice(body)
        .map_err(|e| StoreError::InvalidResponse(format!("not a SPARQL JSON result: {e}")))?;

    let results = document
        .results
        .ok_or_else(|| StoreError::InvalidResponse("response has no 'results' section".into()))?;

    let mut rows = Vec::with_capacity(results.bindings.len());
    for binding in results.bindings {
        let row = binding
            .into_iter()
            .map(|(variable, term)| Ok((variable, term.into_binding()?)))
            .collect::<Result<BindingRow, StoreError>>()?;
        rows.push(row);
    }

    Ok(BindingSet {
        variables: document.head.vars,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select_results() {
        let body = br#"{
            "head": { "vars": ["facility", "status", "label"] },
            "results": { "bindings": [
                {
                    "facility": { "type": "uri", "value": "http://example.org/humanitarian#clinic_goma" },
                    "status": { "type": "literal", "value": "functional" }
                },
                {
                    "facility": { "type": "bnode", "value": "b0" },
                    "label": { "type": "literal", "value": "Kliniki", "xml:lang": "sw" }
                }
            ] }
        }"#;

        let bindings = parse_results(body).unwrap();
        assert_eq!(bindings.variables, vec!["facility", "status", "label"]);
        assert_eq!(bindings.len(), 2);
        assert_eq!(
            bindings.rows[0]["facility"],
            BindingValue::iri("http://example.org/humanitarian#clinic_goma")
        );
        assert!(!bindings.rows[0].contains_key("label"));
        assert_eq!(
            bindings.rows[1]["label"],
            BindingValue::Literal {
                value: "Kliniki".to_string(),
                datatype: None,
                language: Some("sw".to_string()),
            }
        );
        assert!(matches!(bindings.rows[1]["facility"], BindingValue::Blank { .. }));
    }

    #[test]
    fn test_parse_typed_literals() {
        let body = br#"{
            "head": { "vars": ["capacity"] },
            "results": { "bindings": [
                { "capacity": { "type": "literal", "value": "12000",
                  "datatype": "http://www.w3.org/2001/XMLSchema#integer" } },
                { "capacity": { "type": "typed-literal", "value": "8500",
                  "datatype": "http://www.w3.org/2001/XMLSchema#integer" } }
            ] }
        }"#;

        let bindings = parse_results(body).unwrap();
        assert_eq!(
            bindings.rows[1]["capacity"],
            BindingValue::typed("8500", hkq_core::Datatype::Integer)
        );
    }

    #[test]
    fn test_empty_results() {
        let body = br#"{ "head": { "vars": ["camp"] }, "results": { "bindings": [] } }"#;
        let bindings = parse_results(body).unwrap();
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_rejects_non_select_bodies() {
        assert!(matches!(
            parse_results(br#"{ "head": {}, "boolean": true }"#),
            Err(StoreError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_results(b"<html>502 Bad Gateway</html>"),
            Err(StoreError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_results(
                br#"{ "head": { "vars": ["x"] }, "results": { "bindings": [
                    { "x": { "type": "triple", "value": "" } } ] } }"#
            ),
            Err(StoreError::InvalidResponse(_))
        ));
    }
}

//! Export a generated test suite as Xray import JSON.
//!
//! Detailed test cases become `Manual` tests with structured steps; generic
//! test cases become `Generic` tests whose definition goes in
//! `unstructured`. The browser UI produces the same shape client-side.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::models::{TestCase, TestSuite, TestType};

#[derive(Debug, Serialize)]
pub struct XrayTest {
    pub testtype: &'static str,
    pub fields: XrayFields,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<XrayStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unstructured: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct XrayFields {
    pub summary: String,
    pub description: String,
    pub priority: XrayName,
    pub labels: Vec<String>,
    pub components: Vec<XrayName>,
}

#[derive(Debug, Serialize)]
pub struct XrayName {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct XrayStep {
    pub action: String,
    pub data: String,
    pub result: String,
}

pub fn to_xray(suite: &TestSuite) -> Vec<XrayTest> {
    suite.test_cases.iter().map(xray_test).collect()
}

fn xray_test(tc: &TestCase) -> XrayTest {
    let mut description = tc.summary.clone();
    if let Some(pre) = tc.preconditions.as_deref().filter(|p| !p.is_empty()) {
        description.push_str("\n\nPreconditions: ");
        description.push_str(pre);
    }
    if let Some(expected) = tc.expected_result.as_deref().filter(|e| !e.is_empty()) {
        description.push_str("\n\nExpected result: ");
        description.push_str(expected);
    }

    let mut labels = tc.labels.clone();
    if !labels.iter().any(|l| l == tc.test_type.as_str()) {
        labels.push(tc.test_type.as_str().to_string());
    }

    let fields = XrayFields {
        summary: tc.title.clone(),
        description,
        priority: XrayName {
            name: capitalize(tc.priority.as_str()),
        },
        labels,
        components: tc
            .components
            .iter()
            .map(|c| XrayName { name: c.clone() })
            .collect(),
    };

    if tc.test_type == TestType::Generic || tc.steps.is_empty() {
        return XrayTest {
            testtype: "Generic",
            fields,
            steps: Vec::new(),
            unstructured: Some(
                tc.description
                    .clone()
                    .unwrap_or_else(|| tc.summary.clone()),
            ),
        };
    }

    XrayTest {
        testtype: "Manual",
        fields,
        steps: tc
            .steps
            .iter()
            .map(|s| XrayStep {
                action: s.action.clone(),
                data: s.data_text().unwrap_or_default(),
                result: s.expected_result.clone(),
            })
            .collect(),
        unstructured: None,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Write the Xray JSON to `output`, or stdout when `None`.
pub fn write_xray(suite: &TestSuite, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(&to_xray(suite))?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write export: {}", path.display()))?;
            eprintln!("Exported {} test cases to {}", suite.total_count, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

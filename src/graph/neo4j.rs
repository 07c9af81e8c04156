//! Neo4j [`GraphStore`] over the HTTP transactional Cypher endpoint.
//!
//! Every operation is a single `POST {url}/db/{database}/tx/commit`
//! carrying one or more statements, so a multi-statement write such as
//! [`replace_chunks`](GraphStore::replace_chunks) commits or fails as a unit.
//! Authentication is HTTP basic with `username` from config and
//! `NEO4J_PASSWORD` from the environment.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{keyword_terms, section_id, GraphStats, GraphStore};
use crate::config::{GraphConnection, GraphKind};
use crate::error::{Error, Result};
use crate::models::{Chunk, DocType, Document};
use crate::remote;

const STORE: &str = "neo4j";

pub struct Neo4jGraph {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: Option<String>,
}

struct Statement {
    cypher: String,
    params: Value,
}

fn stmt(cypher: impl Into<String>, params: Value) -> Statement {
    Statement {
        cypher: cypher.into(),
        params,
    }
}

impl Neo4jGraph {
    /// Connect with `NEO4J_PASSWORD` from the environment.
    pub fn new(conn: &GraphConnection) -> Result<Self> {
        let password = remote::api_key("NEO4J_PASSWORD").ok();
        if conn.kind == GraphKind::Managed && password.is_none() {
            return Err(Error::Config(
                "NEO4J_PASSWORD environment variable not set (required for managed graph)"
                    .to_string(),
            ));
        }
        Self::connect(conn, password)
    }

    /// Connect with an explicit password; `None` sends no credentials.
    pub fn connect(conn: &GraphConnection, password: Option<String>) -> Result<Self> {
        Ok(Self {
            client: remote::client(conn.timeout_secs)?,
            endpoint: format!(
                "{}/db/{}/tx/commit",
                conn.url.trim_end_matches('/'),
                conn.database
            ),
            username: conn.username.clone(),
            password,
        })
    }

    /// Run statements in one transaction; returns each statement's rows.
    async fn run(&self, statements: Vec<Statement>) -> Result<Vec<Vec<Vec<Value>>>> {
        let body = json!({
            "statements": statements
                .iter()
                .map(|s| json!({ "statement": s.cypher, "parameters": s.params }))
                .collect::<Vec<_>>(),
        });

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(password) = &self.password {
            req = req.basic_auth(&self.username, Some(password));
        }

        let response = req
            .send()
            .await
            .map_err(|e| Error::store(STORE, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::store(STORE, format!("HTTP {}: {}", status, text)));
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::store(STORE, format!("invalid response: {}", e)))?;
        parse_results(&json)
    }
}

/// Unpack `results[].data[].row`, surfacing the first entry of `errors`.
fn parse_results(json: &Value) -> Result<Vec<Vec<Vec<Value>>>> {
    if let Some(err) = json
        .get("errors")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
    {
        let code = err.get("code").and_then(|c| c.as_str()).unwrap_or("unknown");
        let message = err.get("message").and_then(|m| m.as_str()).unwrap_or("");
        return Err(Error::store(STORE, format!("{}: {}", code, message)));
    }

    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| Error::store(STORE, "response missing results"))?;

    Ok(results
        .iter()
        .map(|result| {
            result
                .get("data")
                .and_then(|d| d.as_array())
                .map(|rows| {
                    rows.iter()
                        .filter_map(|r| r.get("row").and_then(|v| v.as_array()).cloned())
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect())
}

fn chunk_props(chunk: &Chunk) -> Value {
    json!({
        "id": chunk.id,
        "document_id": chunk.document_id,
        "document_path": chunk.document_path,
        "doc_type": chunk.doc_type.as_str(),
        "chunk_index": chunk.chunk_index,
        "section_title": chunk.section_title,
        "text": chunk.text,
        "hash": chunk.hash,
    })
}

fn chunk_from_props(props: &Value) -> Result<Chunk> {
    let str_field = |name: &str| -> Result<String> {
        props
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::store(STORE, format!("chunk node missing '{}'", name)))
    };
    Ok(Chunk {
        id: str_field("id")?,
        document_id: str_field("document_id")?,
        document_path: str_field("document_path")?,
        doc_type: DocType::parse(props.get("doc_type").and_then(|v| v.as_str()).unwrap_or("")),
        chunk_index: props
            .get("chunk_index")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Error::store(STORE, "chunk node missing 'chunk_index'"))?,
        section_title: props
            .get("section_title")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        text: str_field("text")?,
        hash: props
            .get("hash")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

/// First column of each row decoded as a chunk.
fn rows_to_chunks(rows: &[Vec<Value>]) -> Result<Vec<Chunk>> {
    rows.iter()
        .filter_map(|row| row.first())
        .map(chunk_from_props)
        .collect()
}

fn first_statement(mut results: Vec<Vec<Vec<Value>>>) -> Vec<Vec<Value>> {
    if results.is_empty() {
        Vec::new()
    } else {
        results.swap_remove(0)
    }
}

fn count_at(rows: &[Vec<Value>], col: usize) -> u64 {
    rows.first()
        .and_then(|r| r.get(col))
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}

const DELETE_DOCUMENT_CHUNKS: &str = "MATCH (c:Chunk {document_id: $doc_id}) DETACH DELETE c";
const DELETE_DOCUMENT_SECTIONS: &str = "MATCH (s:Section {document_id: $doc_id}) DETACH DELETE s";

#[async_trait]
impl GraphStore for Neo4jGraph {
    fn name(&self) -> &'static str {
        STORE
    }

    async fn ping(&self) -> Result<()> {
        self.run(vec![stmt("RETURN 1", json!({}))]).await.map(|_| ())
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.run(vec![
            stmt(
                "CREATE CONSTRAINT document_id_unique IF NOT EXISTS FOR (d:Document) REQUIRE d.id IS UNIQUE",
                json!({}),
            ),
            stmt(
                "CREATE CONSTRAINT chunk_id_unique IF NOT EXISTS FOR (c:Chunk) REQUIRE c.id IS UNIQUE",
                json!({}),
            ),
            stmt(
                "CREATE CONSTRAINT section_id_unique IF NOT EXISTS FOR (s:Section) REQUIRE s.id IS UNIQUE",
                json!({}),
            ),
        ])
        .await
        .map(|_| ())
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        self.run(vec![stmt(
            "MERGE (d:Document {id: $id}) \
             SET d.path = $path, d.doc_type = $doc_type, d.content_hash = $hash, \
                 d.size = $size, d.modified_at = $modified_at",
            json!({
                "id": doc.id,
                "path": doc.path,
                "doc_type": doc.doc_type.as_str(),
                "hash": doc.content_hash,
                "size": doc.size,
                "modified_at": doc.modified_at,
            }),
        )])
        .await
        .map(|_| ())
    }

    async fn replace_chunks(&self, doc: &Document, chunks: &[Chunk]) -> Result<()> {
        let rows: Vec<Value> = chunks.iter().map(chunk_props).collect();

        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.chunk_index);
        let pairs: Vec<Value> = ordered
            .windows(2)
            .map(|w| json!({ "from": w[0].id, "to": w[1].id }))
            .collect();

        let mut sections: Vec<(String, String, Vec<String>)> = Vec::new();
        for chunk in &ordered {
            let Some(title) = &chunk.section_title else {
                continue;
            };
            let sid = section_id(&doc.id, title);
            match sections.iter_mut().find(|(id, _, _)| *id == sid) {
                Some((_, _, members)) => members.push(chunk.id.clone()),
                None => sections.push((sid, title.clone(), vec![chunk.id.clone()])),
            }
        }
        let sections: Vec<Value> = sections
            .into_iter()
            .map(|(id, title, chunk_ids)| json!({ "id": id, "title": title, "chunk_ids": chunk_ids }))
            .collect();

        let doc_params = json!({ "doc_id": doc.id });
        self.run(vec![
            stmt(DELETE_DOCUMENT_CHUNKS, doc_params.clone()),
            stmt(DELETE_DOCUMENT_SECTIONS, doc_params),
            stmt(
                "MERGE (d:Document {id: $doc_id}) SET d.path = $path, d.doc_type = $doc_type \
                 WITH d UNWIND $rows AS row \
                 CREATE (c:Chunk) SET c = row \
                 CREATE (d)-[:CONTAINS]->(c)",
                json!({
                    "doc_id": doc.id,
                    "path": doc.path,
                    "doc_type": doc.doc_type.as_str(),
                    "rows": rows,
                }),
            ),
            stmt(
                "UNWIND $pairs AS p \
                 MATCH (a:Chunk {id: p.from}), (b:Chunk {id: p.to}) \
                 CREATE (a)-[:NEXT]->(b)",
                json!({ "pairs": pairs }),
            ),
            stmt(
                "UNWIND $sections AS s \
                 CREATE (sec:Section {id: s.id, title: s.title, document_id: $doc_id}) \
                 WITH sec, s UNWIND s.chunk_ids AS cid \
                 MATCH (c:Chunk {id: cid}) \
                 CREATE (c)-[:PART_OF]->(sec)",
                json!({ "sections": sections, "doc_id": doc.id }),
            ),
        ])
        .await
        .map(|_| ())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let params = json!({ "doc_id": document_id });
        self.run(vec![
            stmt(DELETE_DOCUMENT_CHUNKS, params.clone()),
            stmt(DELETE_DOCUMENT_SECTIONS, params.clone()),
            stmt("MATCH (d:Document {id: $doc_id}) DETACH DELETE d", params),
        ])
        .await
        .map(|_| ())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let results = self
            .run(vec![stmt(
                "MATCH (c:Chunk) WHERE c.id IN $ids RETURN c {.*}",
                json!({ "ids": ids }),
            )])
            .await?;
        let mut chunks = rows_to_chunks(&first_statement(results))?;
        // Preserve the caller's id order.
        chunks.sort_by_key(|c| ids.iter().position(|id| *id == c.id).unwrap_or(usize::MAX));
        Ok(chunks)
    }

    async fn document_chunk_ids(&self, document_id: &str) -> Result<Vec<String>> {
        let results = self
            .run(vec![stmt(
                "MATCH (c:Chunk {document_id: $doc_id}) RETURN c.id ORDER BY c.chunk_index",
                json!({ "doc_id": document_id }),
            )])
            .await?;
        Ok(first_statement(results)
            .iter()
            .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
            .collect())
    }

    async fn neighbors(&self, ids: &[String], hops: usize) -> Result<Vec<Chunk>> {
        if ids.is_empty() || hops == 0 {
            return Ok(Vec::new());
        }
        // Variable-length bounds cannot be parameters.
        let cypher = format!(
            "MATCH (start:Chunk) WHERE start.id IN $ids \
             MATCH (start)-[:NEXT|PART_OF*1..{}]-(related:Chunk) \
             WHERE NOT related.id IN $ids \
             WITH DISTINCT related \
             RETURN related {{.*}} ORDER BY related.document_path, related.chunk_index",
            hops
        );
        let results = self.run(vec![stmt(cypher, json!({ "ids": ids }))]).await?;
        rows_to_chunks(&first_statement(results))
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<(Chunk, f32)>> {
        let terms = keyword_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let results = self
            .run(vec![stmt(
                "UNWIND $terms AS term \
                 MATCH (c:Chunk) WHERE toLower(c.text) CONTAINS term \
                 WITH c, count(DISTINCT term) AS hits \
                 RETURN c {.*}, hits ORDER BY hits DESC, c.document_path, c.chunk_index \
                 LIMIT $limit",
                json!({ "terms": terms, "limit": limit }),
            )])
            .await?;

        let total = terms.len() as f32;
        first_statement(results)
            .iter()
            .map(|row| {
                let chunk = row
                    .first()
                    .ok_or_else(|| Error::store(STORE, "empty keyword row"))
                    .and_then(chunk_from_props)?;
                let hits = row.get(1).and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
                Ok((chunk, hits / total))
            })
            .collect()
    }

    async fn stats(&self) -> Result<GraphStats> {
        let results = self
            .run(vec![stmt(
                "CALL { MATCH (d:Document) RETURN count(d) AS documents } \
                 CALL { MATCH (c:Chunk) RETURN count(c) AS chunks } \
                 CALL { MATCH (s:Section) RETURN count(s) AS sections } \
                 RETURN documents, chunks, sections",
                json!({}),
            )])
            .await?;
        let rows = first_statement(results);
        Ok(GraphStats {
            documents: count_at(&rows, 0),
            chunks: count_at(&rows, 1),
            sections: count_at(&rows, 2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_results_unpacks_rows_per_statement() {
        let json = json!({
            "results": [
                {"columns": ["n"], "data": [{"row": [1], "meta": [null]}, {"row": [2], "meta": [null]}]},
                {"columns": [], "data": []}
            ],
            "errors": []
        });
        let results = parse_results(&json).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], vec![vec![json!(1)], vec![json!(2)]]);
        assert!(results[1].is_empty());
    }

    #[test]
    fn parse_results_surfaces_cypher_errors() {
        let json = json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "Invalid input"}]
        });
        let err = parse_results(&json).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("neo4j error"));
        assert!(msg.contains("SyntaxError"));
    }

    #[test]
    fn chunk_props_round_trip_without_section() {
        let chunk = Chunk {
            id: "c1".into(),
            document_id: "d1".into(),
            document_path: "api/login.docx".into(),
            doc_type: DocType::ApiSpec,
            chunk_index: 3,
            section_title: None,
            text: "POST /login".into(),
            hash: "abc".into(),
        };
        let mut props = chunk_props(&chunk);
        // Neo4j drops null-valued properties on write.
        props.as_object_mut().unwrap().remove("section_title");
        assert_eq!(chunk_from_props(&props).unwrap(), chunk);
    }

    #[test]
    fn managed_graph_requires_password() {
        if std::env::var("NEO4J_PASSWORD").is_ok() {
            return;
        }
        let conn = GraphConnection {
            kind: GraphKind::Managed,
            url: "https://abc.databases.neo4j.io".into(),
            database: "neo4j".into(),
            username: "neo4j".into(),
            timeout_secs: 5,
        };
        assert!(matches!(Neo4jGraph::new(&conn), Err(Error::Config(_))));
    }
}

//! Weighted text index kept as SQL postings.
//!
//! Each indexed `(key, field, term)` stores its term frequency; a query sums
//! `tf * weight` over the matching postings.

use tokio_rusqlite::rusqlite::{self, params_from_iter, types::Value as SqlValue};
use tokio_rusqlite::{Connection, params};

use super::documents::all_documents;
use crate::Error;
use crate::store::text::{self, FieldWeights, SearchHit, TextQuery};

pub(crate) fn load_weights(conn: &rusqlite::Connection, namespace: &str) -> Result<Option<FieldWeights>, Error> {
    let mut stmt = conn.prepare("SELECT field, weight FROM text_index_fields WHERE namespace = ?1")?;
    let rows = stmt.query_map(params![namespace], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;

    let mut fields = Vec::new();
    for row in rows {
        fields.push(row?);
    }

    if fields.is_empty() { Ok(None) } else { FieldWeights::new(fields).map(Some) }
}

/// Replace the postings of one document.
pub(crate) fn index_document(
    conn: &rusqlite::Connection, namespace: &str, key: &str, document: &serde_json::Value, weights: &FieldWeights,
) -> Result<(), Error> {
    conn.execute(
        "DELETE FROM text_terms WHERE namespace = ?1 AND key = ?2",
        params![namespace, key],
    )?;

    let mut insert =
        conn.prepare("INSERT INTO text_terms (namespace, key, field, term, tf) VALUES (?1, ?2, ?3, ?4, ?5)")?;
    for (field, _) in weights.iter() {
        let Some(body) = text::field_text(document, field) else { continue };
        for (term, tf) in text::term_frequencies(&body) {
            insert.execute(params![namespace, key, field, term, tf])?;
        }
    }
    Ok(())
}

/// Create or replace a namespace's index, then backfill postings.
pub(crate) async fn ensure(conn: &Connection, namespace: &str, weights: &FieldWeights) -> Result<bool, Error> {
    let namespace = namespace.to_string();
    let weights = weights.clone();

    conn.call(move |conn| -> Result<bool, Error> {
        if load_weights(conn, &namespace)?.as_ref() == Some(&weights) {
            return Ok(false);
        }

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM text_index_fields WHERE namespace = ?1", params![namespace])?;
        tx.execute("DELETE FROM text_terms WHERE namespace = ?1", params![namespace])?;

        let created_at = chrono::Utc::now().to_rfc3339();
        for (field, weight) in weights.iter() {
            tx.execute(
                "INSERT INTO text_index_fields (namespace, field, weight, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![namespace, field, weight, created_at],
            )?;
        }

        let documents = all_documents(&tx, &namespace)?;
        for (key, document) in &documents {
            index_document(&tx, &namespace, key, document, &weights)?;
        }

        tx.commit()?;
        tracing::info!(namespace = %namespace, fields = weights.len(), documents = documents.len(), "built text index");
        Ok(true)
    })
    .await
    .map_err(|e| match Error::from(e) {
        Error::InvalidInput(msg) => Error::InvalidInput(msg),
        other => Error::IndexCreationFailure(other.to_string()),
    })
}

pub(crate) async fn search(conn: &Connection, namespace: &str, query: &TextQuery) -> Result<Vec<SearchHit>, Error> {
    let terms = query.terms();
    if terms.is_empty() || query.limit == 0 || query.filter.as_ref().is_some_and(Vec::is_empty) {
        return Ok(Vec::new());
    }

    let namespace = namespace.to_string();
    let query = query.clone();

    conn.call(move |conn| -> Result<Vec<SearchHit>, Error> {
        let weights = load_weights(conn, &namespace)?
            .ok_or_else(|| Error::InvalidInput(format!("namespace {namespace} has no text index")))?;

        let term_slots = vec!["?"; terms.len()].join(", ");
        let mut sql = format!(
            "SELECT t.key, SUM(t.tf * f.weight) AS score
            FROM text_terms t
            JOIN text_index_fields f ON f.namespace = t.namespace AND f.field = t.field
            WHERE t.namespace = ? AND t.term IN ({term_slots})"
        );

        let mut values: Vec<SqlValue> = Vec::with_capacity(2 + terms.len());
        values.push(SqlValue::Text(namespace.clone()));
        values.extend(terms.iter().cloned().map(SqlValue::Text));

        if let Some(ids) = &query.filter {
            sql.push_str(&format!(" AND t.key IN ({})", vec!["?"; ids.len()].join(", ")));
            values.extend(ids.iter().cloned().map(SqlValue::Text));
        }
        sql.push_str(" GROUP BY t.key ORDER BY score DESC, t.key ASC LIMIT ?");
        values.push(SqlValue::Integer(query.limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut scored = Vec::new();
        for row in rows {
            scored.push(row?);
        }

        let mut doc_stmt = conn.prepare("SELECT value_json FROM documents WHERE namespace = ?1 AND key = ?2")?;
        let mut hits = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            let json: String = doc_stmt.query_row(params![namespace, id], |row| row.get(0))?;
            let document: serde_json::Value = serde_json::from_str(&json)?;
            let matched_text = text::matched_text(&document, &weights, &terms);
            hits.push(SearchHit { id, score, matched_text });
        }
        Ok(hits)
    })
    .await
    .map_err(Error::from)
}

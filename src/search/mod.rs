//! Tantivy-based search index module.
//!
//! Indexes document titles and the plain text of their rich-text content,
//! scoped per owner.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Document;

/// Title hits rank above body hits.
const BOOST_TITLE: f32 = 4.0;
const BOOST_CONTENT: f32 = 1.0;

/// Search result with document id and relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document_id: String,
    pub score: f32,
}

/// Search index schema fields.
struct SearchFields {
    document_id: Field,
    owner: Field,
    title: Field,
    content: Field,
}

/// Tantivy search index for documents.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let document_id = schema_builder.add_text_field("document_id", STRING | STORED);
        let owner = schema_builder.add_text_field("owner", STRING);
        let title = schema_builder.add_text_field("title", TEXT);
        let content = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            document_id,
            owner,
            title,
            content,
        };

        // Try to open existing index or create new one
        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the entire index from documents.
    pub async fn rebuild(&self, documents: &[Document]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for document in documents {
            writer.add_document(self.create_document(document))?;
        }
        writer.commit()?;

        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} documents", documents.len());
        Ok(())
    }

    /// Index (or re-index) a single document.
    pub async fn index_document(&self, document: &Document) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        let term = Term::from_field_text(self.fields.document_id, &document.id);
        writer.delete_term(term);
        writer.add_document(self.create_document(document))?;
        writer.commit()?;

        self.reader.reload()?;

        Ok(())
    }

    /// Remove documents from the index.
    pub async fn remove_documents(&self, document_ids: &[String]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        for id in document_ids {
            writer.delete_term(Term::from_field_text(self.fields.document_id, id));
        }
        writer.commit()?;

        self.reader.reload()?;

        Ok(())
    }

    /// Every hit for the owner, best first. Callers page after filtering
    /// against the store, so archived documents never leave a page short.
    pub fn search_all(&self, owner: &str, query_str: &str) -> Result<Vec<SearchResult>, AppError> {
        let num_docs = self.reader.searcher().num_docs();
        self.search(owner, query_str, usize::try_from(num_docs).unwrap_or(usize::MAX), 0)
    }

    /// Search the given owner's documents.
    ///
    /// Archive state is not indexed; callers filter results against the store.
    pub fn search(
        &self,
        owner: &str,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        if query_str.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let num_docs = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX);
        if offset >= num_docs {
            return Ok(Vec::new());
        }
        let fetch = limit.saturating_add(offset).min(num_docs);

        let mut text_queries: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for (field, boost) in [
            (self.fields.title, BOOST_TITLE),
            (self.fields.content, BOOST_CONTENT),
        ] {
            let mut parser = QueryParser::for_index(&self.index, vec![field]);
            parser.set_conjunction_by_default();
            // Lenient parsing: stray quotes or colons from user input should not error.
            let (field_query, _errors) = parser.parse_query_lenient(query_str);
            text_queries.push((Occur::Should, Box::new(BoostQuery::new(field_query, boost))));
        }

        let owner_query = TermQuery::new(
            Term::from_field_text(self.fields.owner, owner),
            IndexRecordOption::Basic,
        );
        let combined = BooleanQuery::new(vec![
            (Occur::Must, Box::new(owner_query) as Box<dyn Query>),
            (Occur::Must, Box::new(BooleanQuery::new(text_queries))),
        ]);

        let top_docs = searcher
            .search(&combined, &TopDocs::with_limit(fetch))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let document_id = doc
                    .get_first(self.fields.document_id)?
                    .as_str()?
                    .to_string();
                Some(SearchResult { document_id, score })
            })
            .collect();

        Ok(results)
    }

    fn create_document(&self, document: &Document) -> TantivyDocument {
        doc!(
            self.fields.document_id => document.id.clone(),
            self.fields.owner => document.user_id.clone(),
            self.fields.title => document.title.clone(),
            self.fields.content => document
                .content
                .as_deref()
                .map(extract_text)
                .unwrap_or_default()
        )
    }
}

/// Plain text of a serialized block tree: every string under a `"text"` key,
/// in document order. Content that is not JSON is indexed verbatim.
pub fn extract_text(content: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) => {
            let mut parts = Vec::new();
            collect_text(&value, &mut parts);
            parts.join(" ")
        }
        Err(_) => content.to_string(),
    }
}

fn collect_text<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a str>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                match child {
                    serde_json::Value::String(s) if key == "text" => out.push(s),
                    _ => collect_text(child, out),
                }
            }
        }
        _ => {}
    }
}

use anyhow::{bail, Result};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

use super::schema::Database;
use super::types::{Article, ArticleDbRow, ArticleFilter, ArticleTag, SortKey};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles returned by any single read.
///
/// A selector's scope never holds more than this, so pagination must stop here.
pub const MAX_ARTICLES: usize = 2000;

/// 12 bound columns per row keeps a 50-row chunk well under SQLite's 999 parameter limit.
const UPSERT_BATCH_SIZE: usize = 50;

const ARTICLE_COLUMNS: &str = "url, title, description, content, author, source_id, source_name, \
     image_url, published_at, category, search_keyword, inserted_at";

impl Database {
    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Insert or overwrite articles by URL in a single transaction.
    ///
    /// Every article must carry a tag. An existing row with the same URL is
    /// replaced column for column (last write wins); duplicates inside the
    /// batch collapse to their last occurrence.
    ///
    /// Insertion timestamps are assigned here, not taken from the records:
    /// each row gets `max(now, previous max + 1µs)`, so save order is
    /// recoverable even when several batches land within the same clock tick.
    ///
    /// Returns the number of rows written.
    pub async fn upsert_articles(&self, articles: &[Article]) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }
        if let Some(untagged) = articles.iter().find(|a| a.tag.is_none()) {
            bail!("Refusing to cache untagged article {}", untagged.url);
        }

        // Keep the last occurrence of each URL, in batch order
        let mut seen = HashSet::new();
        let mut batch: Vec<&Article> = articles
            .iter()
            .rev()
            .filter(|a| seen.insert(a.url.as_str()))
            .collect();
        batch.reverse();

        let mut tx = self.pool.begin().await?;

        let (max_stamp,): (Option<i64>,) = sqlx::query_as("SELECT MAX(inserted_at) FROM articles")
            .fetch_one(&mut *tx)
            .await?;
        let now = chrono::Utc::now().timestamp_micros();
        let mut next = max_stamp.map_or(now, |m| now.max(m.saturating_add(1)));

        for chunk in batch.chunks(UPSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO articles ({}) ", ARTICLE_COLUMNS));

            builder.push_values(chunk, |mut b, article| {
                let (category, keyword) = match &article.tag {
                    Some(ArticleTag::Category(c)) => (Some(c.as_str()), None),
                    Some(ArticleTag::Search(k)) => (None, Some(k.as_str())),
                    None => (None, None),
                };
                b.push_bind(&article.url)
                    .push_bind(&article.title)
                    .push_bind(&article.description)
                    .push_bind(&article.content)
                    .push_bind(&article.author)
                    .push_bind(&article.source_id)
                    .push_bind(&article.source_name)
                    .push_bind(&article.image_url)
                    .push_bind(article.published_at.map(|d| d.timestamp_millis()))
                    .push_bind(category)
                    .push_bind(keyword)
                    .push_bind(next);
                next += 1;
            });

            builder.push(
                " ON CONFLICT(url) DO UPDATE SET \
                 title = excluded.title, \
                 description = excluded.description, \
                 content = excluded.content, \
                 author = excluded.author, \
                 source_id = excluded.source_id, \
                 source_name = excluded.source_name, \
                 image_url = excluded.image_url, \
                 published_at = excluded.published_at, \
                 category = excluded.category, \
                 search_keyword = excluded.search_keyword, \
                 inserted_at = excluded.inserted_at",
            );

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        tracing::debug!(rows = batch.len(), "Articles cached");
        Ok(batch.len())
    }

    /// Delete every article matching `filter` atomically, returning the count removed.
    pub async fn delete_articles(&self, filter: &ArticleFilter) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM articles WHERE ");
        push_filter(&mut builder, filter);
        let result = builder.build().execute(&mut *tx).await?;

        tx.commit().await?;
        tracing::debug!(filter = ?filter, removed = result.rows_affected(), "Cached articles cleared");
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Articles matching `filter`, oldest insertion first.
    pub async fn query_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>> {
        self.query_articles_sorted(filter, SortKey::InsertedAt, true)
            .await
    }

    /// Articles matching `filter`, ordered by `sort`. Ties fall back to insertion order.
    ///
    /// Capped at MAX_ARTICLES rows.
    pub async fn query_articles_sorted(
        &self,
        filter: &ArticleFilter,
        sort: SortKey,
        ascending: bool,
    ) -> Result<Vec<Article>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM articles WHERE ", ARTICLE_COLUMNS));
        push_filter(&mut builder, filter);

        let column = match sort {
            SortKey::InsertedAt => "inserted_at",
            SortKey::PublishedAt => "published_at",
        };
        let direction = if ascending { "ASC" } else { "DESC" };
        builder.push(format!(
            " ORDER BY {} {}, inserted_at ASC LIMIT ",
            column, direction
        ));
        builder.push_bind(MAX_ARTICLES as i64);

        let rows: Vec<ArticleDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    pub async fn count_articles(&self, filter: &ArticleFilter) -> Result<i64> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM articles WHERE ");
        push_filter(&mut builder, filter);
        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// The most recently inserted article matching `filter`.
    ///
    /// Used on cold start to recover the last keyword or category the user viewed.
    pub async fn newest_article(&self, filter: &ArticleFilter) -> Result<Option<Article>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM articles WHERE ", ARTICLE_COLUMNS));
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY inserted_at DESC LIMIT 1");

        let row: Option<ArticleDbRow> = builder
            .build_query_as()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ArticleDbRow::into_article))
    }
}

fn push_filter<'args>(builder: &mut QueryBuilder<'args, Sqlite>, filter: &'args ArticleFilter) {
    match filter {
        ArticleFilter::All => {
            builder.push("1 = 1");
        }
        ArticleFilter::AnyCategory => {
            builder.push("category IS NOT NULL");
        }
        ArticleFilter::Category(category) => {
            builder.push("category = ");
            builder.push_bind(category.as_str());
        }
        ArticleFilter::AnySearch => {
            builder.push("search_keyword IS NOT NULL");
        }
        ArticleFilter::SearchKeyword(keyword) => {
            builder.push("search_keyword = ");
            builder.push_bind(keyword.as_str());
        }
    }
}

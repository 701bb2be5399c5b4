mod articles;
mod schema;
mod types;

pub use articles::MAX_ARTICLES;
pub use schema::Database;
pub use types::{
    Article, ArticleFilter, ArticleTag, Category, DatabaseError, SortKey, UnknownCategory,
};

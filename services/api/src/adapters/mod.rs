pub mod db;
pub mod queue;
pub mod reading_llm;

pub use db::DbAdapter;
pub use queue::PgJobQueue;
pub use reading_llm::OpenAiReadingAdapter;

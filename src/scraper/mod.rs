pub mod fetcher;
pub mod resolver;
pub mod traits;

pub use fetcher::{ChallengeGuard, HttpFetcher, RenderFetcher};
pub use resolver::PageResolver;
pub use traits::Fetcher;

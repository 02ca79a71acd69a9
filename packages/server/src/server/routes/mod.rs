// HTTP routes
pub mod crawl;
pub mod health;
pub mod progress;
pub mod sessions;
pub mod stream;

pub use crawl::*;
pub use health::*;
pub use progress::*;
pub use sessions::*;
pub use stream::*;

mod job;
mod schema;
mod state;
mod stream;
mod task;

pub use job::*;
pub use schema::*;
pub use state::*;
pub use stream::*;
pub use task::*;

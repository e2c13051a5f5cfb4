mod middleware;
mod public;

pub use middleware::RequestContext;
pub use public::{HttpState, SubmitForm, build_router};

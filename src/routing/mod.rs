pub mod router;

pub use router::{HandlerKind, Route, Router};

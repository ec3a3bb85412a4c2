mod dispatcher;
mod knock_listener;

pub use dispatcher::Dispatcher;
pub use knock_listener::{KnockListener, ListenerManager};

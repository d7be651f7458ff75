use crate::server::ServerRouter;

mod feeds;

pub fn routes() -> ServerRouter {
    ServerRouter::new().merge(feeds::routes())
}

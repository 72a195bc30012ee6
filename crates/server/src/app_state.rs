use server_api::ApiContext;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    /// Capacity of each connection's outbound event queue.
    pub(crate) outbound_buffer: usize,
}

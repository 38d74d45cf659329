use server_api::ForwardingGateway;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) gateway: ForwardingGateway,
}

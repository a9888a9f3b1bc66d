//! Scriptable in-process backends for the integration suite and the demo
//! binary. Responses are queued up front; every call is recorded so tests
//! can assert on exactly what the server sent out.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use super::application::{
    ApplicationServer, BackendError, GetDataDownRequest, GetDataDownResponse,
    HandleDataDownAckRequest, HandleDataUpRequest, HandleErrorRequest, JoinRequestRequest,
    JoinRequestResponse,
};
use super::controller::{ControllerErrorRequest, HandleDataUpMacCommandRequest, NetworkController};

#[derive(Default)]
struct AppState {
    join_response: Option<Result<JoinRequestResponse, BackendError>>,
    data_down: VecDeque<Option<GetDataDownResponse>>,
    join_requests: Vec<JoinRequestRequest>,
    data_up: Vec<HandleDataUpRequest>,
    data_down_requests: Vec<GetDataDownRequest>,
    acks: Vec<HandleDataDownAckRequest>,
    errors: Vec<HandleErrorRequest>,
}

/// Application-server stub.
#[derive(Default)]
pub struct MockApplicationServer {
    state: Mutex<AppState>,
}

impl MockApplicationServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response to the next `join_request` calls.
    pub async fn set_join_response(&self, resp: Result<JoinRequestResponse, BackendError>) {
        self.state.lock().await.join_response = Some(resp);
    }

    /// Queue one `get_data_down` response; an exhausted queue answers
    /// `None` (nothing queued).
    pub async fn push_data_down(&self, resp: Option<GetDataDownResponse>) {
        self.state.lock().await.data_down.push_back(resp);
    }

    pub async fn take_join_requests(&self) -> Vec<JoinRequestRequest> {
        std::mem::take(&mut self.state.lock().await.join_requests)
    }

    pub async fn take_data_up(&self) -> Vec<HandleDataUpRequest> {
        std::mem::take(&mut self.state.lock().await.data_up)
    }

    pub async fn take_data_down_requests(&self) -> Vec<GetDataDownRequest> {
        std::mem::take(&mut self.state.lock().await.data_down_requests)
    }

    pub async fn take_acks(&self) -> Vec<HandleDataDownAckRequest> {
        std::mem::take(&mut self.state.lock().await.acks)
    }

    pub async fn take_errors(&self) -> Vec<HandleErrorRequest> {
        std::mem::take(&mut self.state.lock().await.errors)
    }
}

#[async_trait]
impl ApplicationServer for MockApplicationServer {
    async fn join_request(
        &self,
        req: JoinRequestRequest,
    ) -> Result<JoinRequestResponse, BackendError> {
        let mut state = self.state.lock().await;
        state.join_requests.push(req);
        match &state.join_response {
            Some(resp) => resp.clone(),
            None => Err(BackendError::Rpc("no join response scripted".to_string())),
        }
    }

    async fn handle_data_up(&self, req: HandleDataUpRequest) -> Result<(), BackendError> {
        self.state.lock().await.data_up.push(req);
        Ok(())
    }

    async fn get_data_down(
        &self,
        req: GetDataDownRequest,
    ) -> Result<Option<GetDataDownResponse>, BackendError> {
        let mut state = self.state.lock().await;
        state.data_down_requests.push(req);
        Ok(state.data_down.pop_front().flatten())
    }

    async fn handle_data_down_ack(
        &self,
        req: HandleDataDownAckRequest,
    ) -> Result<(), BackendError> {
        self.state.lock().await.acks.push(req);
        Ok(())
    }

    async fn handle_error(&self, req: HandleErrorRequest) -> Result<(), BackendError> {
        self.state.lock().await.errors.push(req);
        Ok(())
    }
}

#[derive(Default)]
struct ControllerState {
    mac_commands: Vec<HandleDataUpMacCommandRequest>,
    errors: Vec<ControllerErrorRequest>,
}

/// Network-controller stub.
#[derive(Default)]
pub struct MockNetworkController {
    state: Mutex<ControllerState>,
}

impl MockNetworkController {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn take_mac_commands(&self) -> Vec<HandleDataUpMacCommandRequest> {
        std::mem::take(&mut self.state.lock().await.mac_commands)
    }

    pub async fn take_errors(&self) -> Vec<ControllerErrorRequest> {
        std::mem::take(&mut self.state.lock().await.errors)
    }
}

#[async_trait]
impl NetworkController for MockNetworkController {
    async fn handle_data_up_mac_command(
        &self,
        req: HandleDataUpMacCommandRequest,
    ) -> Result<(), BackendError> {
        self.state.lock().await.mac_commands.push(req);
        Ok(())
    }

    async fn handle_error(&self, req: ControllerErrorRequest) -> Result<(), BackendError> {
        self.state.lock().await.errors.push(req);
        Ok(())
    }
}

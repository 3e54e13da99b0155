// tests/integration/rpc_roundtrip_test.rs

//! Scenario: JSON-RPC round trip over durable queues, including the
//! predefined process methods and the completed-queue fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clusterlib::core::constants::{JSON_KEY_NOTIFYABLE_KEY, PLK_STATE, PLV_STATE_RUNNING, RPC_START_PROCESS};
use clusterlib::core::errors::Result;
use clusterlib::core::notifyable::{
    AccessType, HasNodes, HasProcessSlots, HasQueues, Notifyable,
};
use clusterlib::core::rpc::methods::StartProcessMethod;
use clusterlib::core::rpc::{MethodRegistry, RpcMethod, StatePersistence};
use serde_json::{Map, Value, json};

use crate::integration::fixtures;

struct EchoMethod;

#[async_trait]
impl RpcMethod for EchoMethod {
    fn name(&self) -> &str {
        "echo"
    }

    fn check_params(&self, _params: &Map<String, Value>) -> Result<()> {
        Ok(())
    }

    async fn invoke(
        &self,
        _name: &str,
        params: &[Value],
        _persistence: &dyn StatePersistence,
    ) -> Result<Value> {
        Ok(params.first().cloned().unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn request_and_response_travel_their_queues() {
    let cluster = fixtures::cluster(2).await;
    let server_factory = &cluster.factories[0];
    let client_factory = &cluster.factories[1];

    let (_, server_app, _) = fixtures::app_and_group(server_factory).await;
    let recv_server = server_app
        .get_queue("rpcRecv", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let completed_server = server_app
        .get_queue("rpcCompleted", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();

    let mut methods = MethodRegistry::new();
    methods.register(Arc::new(EchoMethod)).unwrap();
    let _server = server_factory.create_json_rpc_method_client(
        recv_server.clone(),
        completed_server.clone(),
        methods,
    );

    let (_, client_app, _) = fixtures::app_and_group(client_factory).await;
    let resp_client = client_app
        .get_queue("rpcResp", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let completed_client = client_app
        .get_queue("rpcClientCompleted", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    // The client addresses the server's queue through its own factory.
    let recv_client = client_factory
        .notifyable_from_key(recv_server.key(), AccessType::LoadFromRepository)
        .await
        .unwrap()
        .unwrap()
        .as_queue()
        .unwrap()
        .clone();

    let rpc = client_factory
        .create_json_rpc_response_client(resp_client.clone(), completed_client.clone());

    let mut params = Map::new();
    params.insert("x".to_string(), json!(1));
    let mut pending = rpc.send_request(&recv_client, "echo", params).await.unwrap();
    let response = pending
        .wait_response_msecs(5000)
        .await
        .unwrap()
        .expect("response arrives");
    assert!(!response.is_error());
    assert_eq!(response.result["x"], json!(1));

    // Both queues drained: nothing left in flight.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recv_server.is_empty().await.unwrap());
    assert!(resp_client.is_empty().await.unwrap());
    assert!(completed_server.is_empty().await.unwrap());

    // Unknown methods come back as error envelopes.
    let mut pending = rpc
        .send_request(&recv_client, "no-such-method", Map::new())
        .await
        .unwrap();
    let response = pending
        .wait_response_msecs(5000)
        .await
        .unwrap()
        .expect("error envelope arrives");
    assert!(response.is_error());
    assert!(response.error.as_str().unwrap().contains("no-such-method"));

    cluster.shutdown().await;
}

#[tokio::test]
async fn start_process_method_edits_desired_state() {
    let cluster = fixtures::cluster(2).await;
    let server_factory = &cluster.factories[0];
    let client_factory = &cluster.factories[1];

    let (_, app, group) = fixtures::app_and_group(server_factory).await;
    let node = group
        .get_node("worker-1", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let slot = node
        .get_process_slot("slot-0", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();

    let recv = app
        .get_queue("procRecv", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let completed = app
        .get_queue("procCompleted", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let mut methods = MethodRegistry::new();
    methods
        .register(Arc::new(StartProcessMethod::new(server_factory.clone())))
        .unwrap();
    let _server = server_factory.create_json_rpc_method_client(recv.clone(), completed, methods);

    let (_, client_app, _) = fixtures::app_and_group(client_factory).await;
    let resp = client_app
        .get_queue("procResp", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let client_completed = client_app
        .get_queue("procClientCompleted", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let rpc = client_factory.create_json_rpc_response_client(resp, client_completed);

    let recv_from_client = client_factory
        .notifyable_from_key(recv.key(), AccessType::LoadFromRepository)
        .await
        .unwrap()
        .unwrap()
        .as_queue()
        .unwrap()
        .clone();

    let mut params = Map::new();
    params.insert(JSON_KEY_NOTIFYABLE_KEY.to_string(), json!(slot.key()));
    params.insert("command".to_string(), json!("/usr/bin/server --serve"));
    let mut pending = rpc
        .send_request(&recv_from_client, RPC_START_PROCESS, params)
        .await
        .unwrap();
    let response = pending
        .wait_response_msecs(5000)
        .await
        .unwrap()
        .expect("start response arrives");
    assert!(!response.is_error(), "error: {}", response.error);

    // The server published the launch request into the slot's desired state.
    let desired = slot.cached_desired_state();
    desired.reset().await.unwrap();
    assert_eq!(
        desired.get(PLK_STATE).await.unwrap(),
        Some(json!(PLV_STATE_RUNNING))
    );
    assert_eq!(
        desired.get("command").await.unwrap(),
        Some(json!("/usr/bin/server --serve"))
    );

    cluster.shutdown().await;
}

//! Two endpoints calling each other over one in-process connection pair.
//!
//! The "server" side exposes a tiny api surface; the "client" side exposes a
//! callback the server pushes to while handling a call. Run with:
//!
//! ```sh
//! cargo run -p crosswire --example duplex
//! ```

use std::sync::Arc;

use crosswire::prelude::*;

struct ServerApi;

impl ApiDelegate for ServerApi {
    async fn receive_call(
        &self,
        conn: RpcConnection,
        _api_id: u64,
        method: String,
        params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        match method.as_str() {
            "get_info" => Ok(json!({"name": "duplex demo", "version": "1.0"})),
            "greet" => {
                let name = params
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("greet expects a name"))?;
                // Push a progress notice back to the caller mid-call.
                conn.notice(1, vec![json!(format!("greeting {name}"))]).await?;
                Ok(json!(format!("hello, {name}!")))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }

    async fn receive_notice(
        &self,
        _conn: RpcConnection,
        _callback_id: u64,
        _params: Vec<Value>,
    ) -> Result<(), RpcError> {
        Ok(())
    }

    async fn receive_callback(
        &self,
        _conn: RpcConnection,
        callback_id: u64,
        _params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        Ok(json!({"ack": callback_id}))
    }
}

struct ClientApi;

impl ApiDelegate for ClientApi {
    async fn receive_call(
        &self,
        _conn: RpcConnection,
        _api_id: u64,
        method: String,
        _params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        Err(RpcError::method_not_found(&method))
    }

    async fn receive_notice(
        &self,
        _conn: RpcConnection,
        callback_id: u64,
        params: Vec<Value>,
    ) -> Result<(), RpcError> {
        println!("notice on subscription {callback_id}: {params:?}");
        Ok(())
    }

    async fn receive_callback(
        &self,
        _conn: RpcConnection,
        callback_id: u64,
        params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        println!("callback {callback_id} invoked with {params:?}");
        Ok(Value::Null)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), RpcError> {
    let (client_transport, server_transport) = Transport::mem_pair();

    let client = RpcConnection::new(client_transport, Arc::new(ClientApi));
    let server = RpcConnection::new(server_transport, Arc::new(ServerApi));
    tokio::spawn(client.clone().run());
    tokio::spawn(server.clone().run());

    let info = client.call(DEFAULT_API, "get_info", vec![]).await?;
    println!("get_info -> {info}");

    let greeting = client
        .call(DEFAULT_API, "greet", vec![json!("crosswire")])
        .await?;
    println!("greet -> {greeting}");

    client.close();
    Ok(())
}

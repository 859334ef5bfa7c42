//! Registry server + client proxy integration

use control_core::{LifecycleState, PortRange, ServiceCategory, ServiceStatus, SteeringCommand};
use service_registry::{
    ComponentEndpoint, Error, HealthRegistry, RegistryApi, RegistryClient, RegistryServer,
    ServiceDescriptor,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const KEY: &str = "test-preshared-key";

fn proxy_range() -> PortRange {
    PortRange {
        min: 27000,
        max: 27999,
        max_tries: 1000,
    }
}

fn companion(id: u32, name: &str) -> ServiceDescriptor {
    ServiceDescriptor::stateful(
        id,
        name,
        ServiceCategory::ApplicationCompanion,
        ComponentEndpoint::None,
    )
}

#[test]
fn full_lifecycle_over_the_proxy() {
    smol::block_on(async {
        let registry = Arc::new(HealthRegistry::new());
        let server = RegistryServer::bind(LOOPBACK, proxy_range(), KEY, registry)
            .await
            .unwrap();
        let addr = server.local_addr();
        let server_task = smol::spawn(async move { server.run().await });

        let client = RegistryClient::connect(addr, KEY).await.unwrap();

        // Register two companions, reject the duplicate.
        client.register(companion(1, "sim-left")).await.unwrap();
        client.register(companion(2, "sim-right")).await.unwrap();
        assert!(matches!(
            client.register(companion(1, "sim-left")).await,
            Err(Error::DuplicateId(1))
        ));

        // Discovery.
        assert_eq!(client.find_all().await.unwrap().len(), 2);
        assert_eq!(
            client.find_by_name("sim-right").await.unwrap().unwrap().id,
            2
        );
        assert_eq!(
            client
                .find_all_by_category(ServiceCategory::ApplicationCompanion)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            client
                .find_all_by_state(LifecycleState::Ready)
                .await
                .unwrap()
                .len(),
            2
        );

        // Drive both through INIT; the global state follows.
        client
            .update_local_state(1, SteeringCommand::Init)
            .await
            .unwrap();
        client
            .update_local_state(2, SteeringCommand::Init)
            .await
            .unwrap();
        assert_eq!(
            client.update_global_state().await.unwrap(),
            LifecycleState::Synchronizing
        );
        assert_eq!(
            client.current_global_state().await.unwrap(),
            LifecycleState::Synchronizing
        );
        assert_eq!(
            client.current_global_status().await.unwrap(),
            ServiceStatus::Up
        );

        // Histories and uptime are visible through the proxy.
        assert_eq!(
            client
                .local_state_transition_history()
                .await
                .unwrap()
                .len(),
            2
        );
        let uptime = client.system_uptime().await.unwrap();
        smol::Timer::after(std::time::Duration::from_millis(10)).await;
        assert!(client.system_uptime().await.unwrap() >= uptime);

        // Graceful shutdown.
        client.stop().await.unwrap();
        server_task.await.unwrap();
    });
}

#[test]
fn illegal_transition_is_an_error_value_across_the_proxy() {
    smol::block_on(async {
        let registry = Arc::new(HealthRegistry::new());
        let server = RegistryServer::bind(LOOPBACK, proxy_range(), KEY, registry)
            .await
            .unwrap();
        let addr = server.local_addr();
        let server_task = smol::spawn(async move { server.run().await });

        let client = RegistryClient::connect(addr, KEY).await.unwrap();
        client.register(companion(7, "sim-left")).await.unwrap();

        let result = client.update_local_state(7, SteeringCommand::Start).await;
        assert!(matches!(result, Err(Error::IllegalTransition(_))));

        // The descriptor went to ERROR on the server side.
        let descriptor = client.find_by_id(7).await.unwrap().unwrap();
        assert_eq!(descriptor.current_state, Some(LifecycleState::Error));

        client.stop().await.unwrap();
        server_task.await.unwrap();
    });
}

#[test]
fn wrong_preshared_key_is_rejected() {
    smol::block_on(async {
        let registry = Arc::new(HealthRegistry::new());
        let server = RegistryServer::bind(LOOPBACK, proxy_range(), KEY, registry)
            .await
            .unwrap();
        let addr = server.local_addr();
        let server_task = smol::spawn(async move { server.run().await });

        let result = RegistryClient::connect(addr, "wrong-key").await;
        assert!(matches!(result, Err(Error::AuthFailed)));

        // The registry is still reachable with the right key.
        let client = RegistryClient::connect(addr, KEY).await.unwrap();
        client.stop().await.unwrap();
        server_task.await.unwrap();
    });
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slog::o;
use vsphere_client::types::mo::VirtualMachinePowerState;
use vsphere_client::types::task::TaskInfoState;
use vsphere_client::types::vm::VirtualMachineCloneSpec;
use vsphere_client::object::{EventManager, OptionManager, SearchIndex, TaskManager};
use vsphere_client::types::{MethodFault, MoRef};
use vsphere_client::{Client, Error};

mod common;

use common::{connect, initialize_log, initialize_server};

#[tokio::test]
async fn test_login_rules() {
    let log = initialize_log("test_login_rules");
    let server = initialize_server(&log, Default::default()).await;
    let client = Client::new(
        &format!("http://{}", server.local_addr()),
        log.new(o!("component" => "client")),
    )
    .await
    .unwrap();
    assert!(client.vim25().is_vcenter());

    let err = client.login("user", "wrong").await.unwrap_err();
    assert!(matches!(err.fault(), Some(MethodFault::InvalidLogin)));

    let root = client.vim25().service_content().root_folder.clone();
    let err = client.vim25().property::<String>(&root, "name").await.unwrap_err();
    assert!(matches!(err.fault(), Some(MethodFault::NotAuthenticated { .. })));

    let session = client.login("user", "pass").await.unwrap();
    assert_eq!(session.user_name, "user");
    let manager = client.session_manager().unwrap();
    let current = manager.user_session().await.unwrap().unwrap();
    assert_eq!(current.key, session.key);
    assert!(manager.session_is_active(&session.key, "user").await.unwrap());

    client.logout().await.unwrap();
    assert!(client.vim25().session_id().is_none());

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_clone_session() {
    let (server, client) = connect("test_clone_session").await;
    let manager = client.session_manager().unwrap();
    let ticket = manager.acquire_clone_ticket().await.unwrap();

    let other = Client::new(client.vim25().url(), client.vim25().log().clone())
        .await
        .unwrap();
    let cloned = other.session_manager().unwrap().clone_session(&ticket).await.unwrap();
    assert_eq!(cloned.user_name, "user");

    // Tickets are single use.
    let third = Client::new(client.vim25().url(), client.vim25().log().clone())
        .await
        .unwrap();
    assert!(third.session_manager().unwrap().clone_session(&ticket).await.is_err());

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_finder() {
    let (server, client) = connect("test_finder").await;
    let mut finder = client.finder();

    let dc = finder.default_datacenter().await.unwrap();
    assert_eq!(dc.name().await.unwrap(), "DC0");
    finder.set_datacenter(dc);

    let vms = finder.virtual_machines("*").await.unwrap();
    assert_eq!(vms.len(), 4);
    let vm = finder.virtual_machine("DC0_H0_VM0").await.unwrap();
    assert_eq!(vm.inventory_path().await.unwrap(), "/DC0/vm/DC0_H0_VM0");
    let same = finder.virtual_machine("/DC0/vm/DC0_H0_VM0").await.unwrap();
    assert_eq!(same.reference(), vm.reference());

    assert!(matches!(
        finder.virtual_machine("DC0_*_VM0").await,
        Err(Error::Multiple { .. })
    ));
    assert!(matches!(
        finder.virtual_machine("nope").await,
        Err(Error::NotFound { .. })
    ));

    let hosts = finder.host_systems("*").await.unwrap();
    assert_eq!(hosts.len(), 4);
    let cluster = finder.cluster("DC0_C0").await.unwrap();
    assert_eq!(cluster.hosts().await.unwrap().len(), 3);

    let ds = finder.default_datastore().await.unwrap();
    assert_eq!(ds.name().await.unwrap(), "LocalDS_0");
    assert_eq!(ds.path("a/b.vmdk").await.unwrap(), "[LocalDS_0] a/b.vmdk");

    let pools = finder.resource_pools("*").await.unwrap();
    assert!(pools.len() >= 2);
    assert!(!finder.networks("*").await.unwrap().is_empty());

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_search_index() {
    let (server, client) = connect("test_search_index").await;
    let index = SearchIndex::of(client.vim25()).unwrap();

    let vm = index.find_by_inventory_path("DC0/vm/DC0_H0_VM0").await.unwrap().unwrap();
    assert_eq!(vm.kind, "VirtualMachine");
    assert!(index.find_by_inventory_path("DC0/vm/missing").await.unwrap().is_none());

    let vm = client.finder().virtual_machine("DC0_H0_VM0").await.unwrap();
    let uuid = vm.uuid().await.unwrap();
    let found = index.find_by_uuid(None, &uuid, true, false).await.unwrap();
    assert_eq!(found.as_ref(), Some(vm.reference()));

    let root = client.vim25().service_content().root_folder.clone();
    let dc = index.find_child(&root, "DC0").await.unwrap().unwrap();
    assert_eq!(dc.kind, "Datacenter");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_power_and_snapshots() {
    let (server, client) = connect("test_power_and_snapshots").await;
    let vm = client.finder().virtual_machine("DC0_H0_VM0").await.unwrap();
    assert_eq!(vm.power_state().await.unwrap(), VirtualMachinePowerState::PoweredOn);

    let err = vm.power_on().await.unwrap().wait().await.unwrap_err();
    assert!(matches!(err.fault(), Some(MethodFault::InvalidPowerState { .. })));

    vm.power_off().await.unwrap().wait().await.unwrap();
    vm.wait_for_power_state(VirtualMachinePowerState::PoweredOff).await.unwrap();

    let first: MoRef = vm
        .create_snapshot("first", Some("before"), false, false)
        .await
        .unwrap()
        .result()
        .await
        .unwrap();
    vm.create_snapshot("second", None, false, false).await.unwrap().wait().await.unwrap();

    let current = vm.current_snapshot().await.unwrap().unwrap();
    assert_eq!(current.reference(), vm.find_snapshot("first/second").await.unwrap().reference());
    assert_eq!(vm.find_snapshot("first").await.unwrap().reference(), &first);

    vm.power_on().await.unwrap().wait().await.unwrap();
    vm.find_snapshot("second").await.unwrap().revert().await.unwrap().wait().await.unwrap();
    assert_eq!(vm.power_state().await.unwrap(), VirtualMachinePowerState::PoweredOff);

    vm.remove_all_snapshots().await.unwrap().wait().await.unwrap();
    assert!(vm.current_snapshot().await.unwrap().is_none());
    assert!(matches!(vm.find_snapshot("first").await, Err(Error::NotFound { .. })));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_clone_and_destroy() {
    let (server, client) = connect("test_clone_and_destroy").await;
    let finder = client.finder();
    let vm = finder.virtual_machine("DC0_H0_VM0").await.unwrap();
    let dc = finder.default_datacenter().await.unwrap();
    let folder = dc.vm_folder().await.unwrap();

    let spec = VirtualMachineCloneSpec { power_on: true, ..Default::default() };
    let created: MoRef = vm
        .clone_vm(folder.reference(), "clone0", spec)
        .await
        .unwrap()
        .result()
        .await
        .unwrap();
    let clone = finder.virtual_machine("clone0").await.unwrap();
    assert_eq!(clone.reference(), &created);
    assert_ne!(clone.uuid().await.unwrap(), vm.uuid().await.unwrap());

    let err = clone.destroy().await.unwrap().wait().await.unwrap_err();
    assert!(matches!(err.fault(), Some(MethodFault::InvalidPowerState { .. })));

    clone.power_off().await.unwrap().wait().await.unwrap();
    clone.destroy().await.unwrap().wait().await.unwrap();
    assert!(matches!(
        finder.virtual_machine("clone0").await,
        Err(Error::NotFound { .. })
    ));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_container_view() {
    let (server, client) = connect("test_container_view").await;
    let views = client.view_manager().unwrap();
    let root = client.vim25().service_content().root_folder.clone();

    let view = views.create_container_view(&root, &["VirtualMachine"], true).await.unwrap();
    let vms = view.find("VirtualMachine").await.unwrap();
    assert_eq!(vms.len(), 4);
    let content = view.retrieve("VirtualMachine", &["name"]).await.unwrap();
    assert!(content.iter().all(|c| c.get("name").is_some()));
    view.destroy().await.unwrap();

    let list = views.create_list_view(&vms[..2]).await.unwrap();
    assert_eq!(list.view().await.unwrap().len(), 2);
    assert!(list.modify(&[], &vms[..1]).await.unwrap().is_empty());
    assert_eq!(list.view().await.unwrap(), vms[1..2].to_vec());
    list.destroy().await.unwrap();

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_property_updates() {
    let (server, client) = connect("test_property_updates").await;
    let vm = client.finder().virtual_machine("DC0_H0_VM0").await.unwrap();
    let collector = client.property_collector().create().await.unwrap();

    let content = collector.retrieve_one(vm.reference(), &["name", "runtime.powerState"]).await.unwrap();
    assert_eq!(content.get("name").and_then(|v| v.as_str()), Some("DC0_H0_VM0"));

    let task = vm.power_off().await.unwrap();
    let mut off = false;
    vsphere_client::property::wait(&collector, vm.reference(), &["runtime.powerState"], |changes| {
        off = changes.iter().any(|c| {
            c.val.as_ref().and_then(|v| v.as_str()) == Some("poweredOff")
        });
        off
    })
    .await
    .unwrap();
    assert!(off);
    task.wait().await.unwrap();

    collector.destroy().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_tasks_and_events() {
    let (server, client) = connect("test_tasks_and_events").await;
    let vm = client.finder().virtual_machine("DC0_H0_VM0").await.unwrap();

    let (task, info) = TaskManager::of(client.vim25())
        .unwrap()
        .create_task(vm.reference(), "com.example.backup", Some("backup"), true)
        .await
        .unwrap();
    assert_eq!(info.state, TaskInfoState::Queued);
    task.set_state(TaskInfoState::Running, None, None).await.unwrap();
    task.update_progress(50).await.unwrap();
    task.set_state(TaskInfoState::Success, None, None).await.unwrap();
    assert_eq!(task.info().await.unwrap().state, TaskInfoState::Success);

    vm.power_off().await.unwrap().wait().await.unwrap();
    let events = EventManager::of(client.vim25()).unwrap();
    let latest = events.latest_event().await.unwrap().unwrap();
    assert_eq!(latest.kind, "VmPoweredOffEvent");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_option_manager() {
    let (server, client) = connect("test_option_manager").await;
    let options = OptionManager::of(client.vim25()).unwrap();

    let found = options.query("VirtualCenter.").await.unwrap();
    assert!(found.iter().any(|o| o.key == "VirtualCenter.InstanceName"));

    let err = options.query("no.such.setting").await.unwrap_err();
    assert!(matches!(err.fault(), Some(MethodFault::InvalidName { .. })));

    server.close().await.unwrap();
}

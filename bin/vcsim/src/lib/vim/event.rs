// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `EventManager` and the in-memory event history.

use std::collections::VecDeque;

use chrono::Utc;
use serde_json::{json, Value};
use vim_api_types::event::{
    EntityEventArgument, Event, EventFilterSpec, EventFilterSpecRecursionOption,
};
use vim_api_types::methods::{PostEventRequest, QueryEventsRequest};
use vim_api_types::{MethodFault, MoRef};

use super::{decode, encode, method_not_found, Call, MethodResult};
use crate::inventory::Inventory;
use crate::registry::Registry;

const MAX_EVENTS: usize = 1000;

#[derive(Default)]
pub struct History {
    events: VecDeque<Event>,
    next_key: i32,
}

impl History {
    pub fn push(&mut self, mut event: Event) -> i32 {
        self.next_key += 1;
        event.key = self.next_key;
        if event.chain_id == 0 {
            event.chain_id = event.key;
        }
        self.events.push_back(event);
        if self.events.len() > MAX_EVENTS {
            self.events.pop_front();
        }
        self.next_key
    }

    pub fn latest(&self) -> Option<&Event> {
        self.events.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Event> {
        self.events.iter()
    }
}

fn argument(reg: &Registry, r: &MoRef) -> EntityEventArgument {
    EntityEventArgument {
        name: reg.name(r).unwrap_or_default().to_string(),
        entity: Some(r.clone()),
    }
}

/// Fills the datacenter, compute resource, host and VM arguments of `event`
/// from the position of `entity` in the inventory.
fn locate(reg: &Registry, event: &mut Event, entity: &MoRef) {
    let mut host = None;
    match entity.kind.as_str() {
        "VirtualMachine" => {
            event.vm = Some(argument(reg, entity));
            host = reg.vm(entity).ok().and_then(|vm| vm.runtime.host.clone());
        }
        "HostSystem" => host = Some(entity.clone()),
        "ComputeResource" | "ClusterComputeResource" => {
            event.compute_resource = Some(argument(reg, entity));
        }
        _ => {}
    }
    if let Some(host) = host {
        event.host = Some(argument(reg, &host));
        if let Some(parent) = reg.entity(&host).ok().and_then(|e| e.parent.clone()) {
            event.compute_resource = Some(argument(reg, &parent));
        }
    }
    if let Some(dc) = reg.datacenter_of(entity) {
        event.datacenter = Some(argument(reg, &dc));
    }
}

/// Records an event of type `kind` about `entity`.
pub fn post(
    inv: &mut Inventory,
    kind: &str,
    user: &str,
    entity: Option<&MoRef>,
    message: String,
) -> i32 {
    let mut event = Event {
        kind: kind.to_string(),
        key: 0,
        chain_id: 0,
        created_time: Utc::now(),
        user_name: user.to_string(),
        datacenter: None,
        compute_resource: None,
        host: None,
        vm: None,
        full_formatted_message: Some(message),
    };
    if let Some(entity) = entity {
        locate(&inv.registry, &mut event, entity);
    }
    let key = inv.events.push(event);
    inv.registry.touch();
    key
}

/// Returns true if `event` refers to an entity selected by `filter`.
fn entity_matches(
    reg: &Registry,
    event: &Event,
    target: &MoRef,
    recursion: EventFilterSpecRecursionOption,
) -> bool {
    event.entities().any(|e| match recursion {
        EventFilterSpecRecursionOption::OnlySelf => e == target,
        EventFilterSpecRecursionOption::Children => {
            e == target
                || reg.entity(e).ok().and_then(|x| x.parent.as_ref()) == Some(target)
        }
        EventFilterSpecRecursionOption::All => reg.is_descendant(e, target),
    })
}

pub fn query(reg: &Registry, history: &History, filter: &EventFilterSpec) -> Vec<Event> {
    let max = filter
        .max_count
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(usize::MAX);
    history
        .iter()
        .rev()
        .filter(|e| {
            filter.event_type_id.is_empty() || filter.event_type_id.contains(&e.kind)
        })
        .filter(|e| match &filter.user_name {
            Some(by) if !by.user_list.is_empty() => {
                by.user_list.contains(&e.user_name)
            }
            _ => true,
        })
        .filter(|e| match &filter.entity {
            Some(by) => entity_matches(reg, e, &by.entity, by.recursion),
            None => true,
        })
        .take(max)
        .cloned()
        .collect()
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    match method {
        "QueryEvents" => {
            let req: QueryEventsRequest = decode(args)?;
            if let Some(by) = &req.filter.entity {
                call.inv.registry.lookup(&by.entity)?;
            }
            encode(&query(&call.inv.registry, &call.inv.events, &req.filter))
        }
        "PostEvent" => {
            let req: PostEventRequest = decode(args)?;
            let mut event = req.event_to_post;
            for arg in [&event.vm, &event.host] {
                if let Some(r) = arg.as_ref().and_then(|a| a.entity.as_ref()) {
                    if !call.inv.registry.contains(r) {
                        return Err(MethodFault::not_found(r.clone()));
                    }
                }
            }
            if event.user_name.is_empty() {
                event.user_name = call.user();
            }
            event.created_time = Utc::now();
            call.inv.events.push(event);
            call.inv.registry.touch();
            Ok(Value::Null)
        }
        _ => Err(method_not_found(this, method)),
    }
}

pub fn properties(inv: &Inventory) -> Value {
    json!({
        "latestEvent": inv.events.latest(),
        "maxCollector": 32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vim_api_types::event::EventFilterSpecByEntity;

    #[test]
    fn history_is_bounded_and_keyed() {
        let mut inv = Inventory::new(false, Default::default());
        for i in 0..(MAX_EVENTS + 5) {
            post(&mut inv, "GeneralUserEvent", "user", None, format!("e{i}"));
        }
        assert_eq!(inv.events.iter().count(), MAX_EVENTS);
        let latest = inv.events.latest().unwrap();
        assert_eq!(latest.key as usize, MAX_EVENTS + 5);
        assert_eq!(latest.chain_id, latest.key);
    }

    #[test]
    fn query_filters_by_type_and_count() {
        let mut inv = Inventory::new(false, Default::default());
        post(&mut inv, "VmPoweredOnEvent", "alice", None, "on".into());
        post(&mut inv, "VmPoweredOffEvent", "bob", None, "off".into());
        post(&mut inv, "VmPoweredOnEvent", "bob", None, "on".into());

        let filter = EventFilterSpec {
            event_type_id: vec!["VmPoweredOnEvent".into()],
            ..Default::default()
        };
        let found = query(&inv.registry, &inv.events, &filter);
        assert_eq!(found.len(), 2);
        // newest first
        assert_eq!(found[0].user_name, "bob");

        let filter = EventFilterSpec { max_count: Some(1), ..Default::default() };
        assert_eq!(query(&inv.registry, &inv.events, &filter).len(), 1);

        let filter = EventFilterSpec {
            entity: Some(EventFilterSpecByEntity {
                entity: MoRef::new("VirtualMachine", "vm-1"),
                recursion: EventFilterSpecRecursionOption::All,
            }),
            ..Default::default()
        };
        assert!(query(&inv.registry, &inv.events, &filter).is_empty());
    }
}

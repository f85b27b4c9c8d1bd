// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The property collector.
//!
//! Every session sees its own default collector behind the well-known
//! `propertyCollector` reference. Collectors, their filters and any
//! pending retrieval tokens are scoped to the session which created them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Notify;
use vim_api_types::methods::{
    CreateFilterRequest, RetrievePropertiesExRequest, RetrievePropertiesRequest,
    TokenRequest, WaitForUpdatesExRequest,
};
use vim_api_types::property::{
    DynamicProperty, MissingProperty, ObjectContent, PropertyFilterSpec,
    PropertySpec, RetrieveResult, SelectionSpec, TraversalSpec,
};
use vim_api_types::{MethodFault, MoRef};

use super::{decode, encode, event, method_not_found, option, session, task};
use super::{view, Call, MethodResult};
use crate::inventory::{self, Inventory, Scoped, ScopedObject};

pub mod path;
pub mod wait;

/// Properties last reported for an object, keyed by path.
pub type Snapshot = BTreeMap<String, Value>;

pub struct Collector {
    pub filters: Vec<MoRef>,
    /// Version of the last update set returned.
    pub version: u64,
    /// Fails a pending `WaitForUpdatesEx`.
    pub cancel: Arc<Notify>,
    /// Retrieval remainders and their page size, by token.
    tokens: BTreeMap<String, (usize, Vec<ObjectContent>)>,
}

impl Collector {
    pub fn new() -> Self {
        Collector {
            filters: Vec::new(),
            version: 0,
            cancel: Arc::new(Notify::new()),
            tokens: BTreeMap::new(),
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Collector::new()
    }
}

pub struct Filter {
    pub collector: MoRef,
    pub spec: PropertyFilterSpec,
    pub partial_updates: bool,
    pub reported: BTreeMap<MoRef, Snapshot>,
}

/// Resolves `this` to one of the caller's collectors, creating the
/// session's default collector on first use.
pub fn resolve(
    inv: &mut Inventory,
    session: &str,
    this: &MoRef,
) -> Result<MoRef, MethodFault> {
    if this == &inv.content.property_collector {
        let r = MoRef::new(
            "PropertyCollector",
            format!("session[{}]{}", session, inventory::PROPERTY_COLLECTOR),
        );
        inv.scoped.entry(r.clone()).or_insert_with(|| Scoped {
            owner: session.to_string(),
            object: ScopedObject::Collector(Collector::new()),
        });
        return Ok(r);
    }
    match inv.scoped(Some(session), this)? {
        ScopedObject::Collector(_) => Ok(this.clone()),
        _ => Err(MethodFault::not_found(this.clone())),
    }
}

pub fn collector_mut<'a>(
    inv: &'a mut Inventory,
    session: &str,
    r: &MoRef,
) -> Result<&'a mut Collector, MethodFault> {
    match inv.scoped_mut(Some(session), r)? {
        ScopedObject::Collector(c) => Ok(c),
        _ => Err(MethodFault::not_found(r.clone())),
    }
}

fn internal(e: serde_json::Error) -> MethodFault {
    MethodFault::system_error(e.to_string())
}

/// Renders the properties of any object visible to `session`, or `None`
/// if there is no such object.
pub fn object_value(
    inv: &Inventory,
    session: Option<&str>,
    r: &MoRef,
) -> Result<Option<Value>, MethodFault> {
    if let Some(obj) = inv.registry.get(r) {
        return obj.to_value().map(Some).map_err(internal);
    }
    if inv.is_singleton(r) {
        let value = match r.kind.as_str() {
            "ServiceInstance" => json!({
                "content": inv.content,
                "serverClock": Utc::now(),
                "capability": {
                    "provisioningSupported": false,
                    "multiHostSupported": inv.is_vcenter(),
                    "userShellAccessSupported": false,
                },
            }),
            "SessionManager" => session::properties(inv, session),
            "EventManager" => event::properties(inv),
            "TaskManager" => task::properties(inv),
            "OptionManager" => option::properties(&inv.settings),
            "ViewManager" => view::manager_properties(inv, session),
            "PropertyCollector" => {
                let filters = session
                    .map(|key| {
                        let r = MoRef::new(
                            "PropertyCollector",
                            format!("session[{}]{}", key, inventory::PROPERTY_COLLECTOR),
                        );
                        match inv.scoped(Some(key), &r) {
                            Ok(ScopedObject::Collector(c)) => c.filters.clone(),
                            _ => Vec::new(),
                        }
                    })
                    .unwrap_or_default();
                json!({ "filter": filters })
            }
            _ => json!({}),
        };
        return Ok(Some(value));
    }
    let Ok(scoped) = inv.scoped(session, r) else {
        return Ok(None);
    };
    let value = match scoped {
        ScopedObject::Collector(c) => json!({ "filter": c.filters }),
        ScopedObject::Filter(f) => json!({
            "spec": f.spec,
            "partialUpdates": f.partial_updates,
        }),
        ScopedObject::ContainerView(v) => {
            let mut v = v.clone();
            v.view = view::container_contents(&inv.registry, &v);
            serde_json::to_value(v).map_err(internal)?
        }
        ScopedObject::ListView(v) => serde_json::to_value(v).map_err(internal)?,
    };
    Ok(Some(value))
}

/// What to do about an `ObjectSpec` naming an object that does not exist.
#[derive(Clone, Copy, PartialEq)]
pub enum Missing {
    Fail,
    Report,
    Skip,
}

fn named_traversals<'a>(
    selections: &'a [SelectionSpec],
    out: &mut BTreeMap<&'a str, &'a TraversalSpec>,
) {
    for sel in selections {
        if let SelectionSpec::TraversalSpec(ts) = sel {
            if let Some(name) = ts.name.as_deref() {
                if out.insert(name, ts).is_some() {
                    continue;
                }
            }
            named_traversals(&ts.select_set, out);
        }
    }
}

struct Walk<'a> {
    inv: &'a Inventory,
    session: Option<&'a str>,
    named: BTreeMap<&'a str, &'a TraversalSpec>,
    /// Pairs of object and traversal (by address) already followed.
    followed: BTreeSet<(MoRef, usize)>,
    found: Vec<(MoRef, Value)>,
    seen: BTreeSet<MoRef>,
}

impl<'a> Walk<'a> {
    fn add(&mut self, r: &MoRef, value: &Value) {
        if self.seen.insert(r.clone()) {
            self.found.push((r.clone(), value.clone()));
        }
    }

    fn select(
        &mut self,
        obj: &MoRef,
        value: &Value,
        selections: &'a [SelectionSpec],
    ) -> Result<(), MethodFault> {
        for sel in selections {
            let ts = match sel {
                SelectionSpec::TraversalSpec(ts) => ts,
                SelectionSpec::SelectionSpec { name } => {
                    let name = name.as_deref().unwrap_or_default();
                    *self
                        .named
                        .get(name)
                        .ok_or_else(|| MethodFault::invalid_argument("selectSet"))?
                }
            };
            if !path::is_kind_of(&obj.kind, &ts.kind) {
                continue;
            }
            let id = ts as *const TraversalSpec as usize;
            if !self.followed.insert((obj.clone(), id)) {
                continue;
            }
            let Ok(Some(target)) = path::lookup(&obj.kind, value, &ts.path)
            else {
                continue;
            };
            for next in path::references(&target) {
                let Some(next_value) = object_value(self.inv, self.session, &next)?
                else {
                    continue;
                };
                if !ts.skip.unwrap_or(false) {
                    self.add(&next, &next_value);
                }
                self.select(&next, &next_value, &ts.select_set)?;
            }
        }
        Ok(())
    }
}

/// Collects the properties named by `prop_set` from an object.
///
/// Returns `None` when no property spec applies to the object's type.
fn object_content(
    obj: &MoRef,
    value: &Value,
    prop_set: &[PropertySpec],
) -> Option<ObjectContent> {
    let specs: Vec<&PropertySpec> = prop_set
        .iter()
        .filter(|p| path::is_kind_of(&obj.kind, &p.kind))
        .collect();
    if specs.is_empty() {
        return None;
    }
    let mut content = ObjectContent {
        obj: obj.clone(),
        prop_set: Vec::new(),
        missing_set: Vec::new(),
    };
    let mut names = BTreeSet::new();
    for spec in specs {
        if spec.all == Some(true) {
            if let Some(map) = value.as_object() {
                for (name, val) in map {
                    if val.is_null() || name.starts_with('_') {
                        continue;
                    }
                    if names.insert(name.clone()) {
                        content.prop_set.push(DynamicProperty {
                            name: name.clone(),
                            val: val.clone(),
                        });
                    }
                }
            }
        }
        for p in &spec.path_set {
            match path::lookup(&obj.kind, value, p) {
                Ok(Some(val)) => {
                    if names.insert(p.clone()) {
                        content.prop_set.push(DynamicProperty { name: p.clone(), val });
                    }
                }
                Ok(None) => {}
                Err(fault) => content.missing_set.push(MissingProperty {
                    path: p.clone(),
                    fault: fault.into(),
                }),
            }
        }
    }
    Some(content)
}

/// Runs a filter spec against the inventory.
pub fn collect(
    inv: &Inventory,
    session: Option<&str>,
    spec: &PropertyFilterSpec,
    missing: Missing,
) -> Result<Vec<ObjectContent>, MethodFault> {
    let mut named = BTreeMap::new();
    for os in &spec.object_set {
        named_traversals(&os.select_set, &mut named);
    }
    let mut walk = Walk {
        inv,
        session,
        named,
        followed: BTreeSet::new(),
        found: Vec::new(),
        seen: BTreeSet::new(),
    };
    let report = missing == Missing::Report
        || spec.report_missing_objects_in_results == Some(true);
    let mut absent = Vec::new();

    for os in &spec.object_set {
        let Some(value) = object_value(inv, session, &os.obj)? else {
            match (report, missing) {
                (true, _) => absent.push(ObjectContent {
                    obj: os.obj.clone(),
                    prop_set: Vec::new(),
                    missing_set: vec![MissingProperty {
                        path: String::new(),
                        fault: MethodFault::not_found(os.obj.clone()).into(),
                    }],
                }),
                (false, Missing::Skip) => {}
                (false, _) => return Err(MethodFault::not_found(os.obj.clone())),
            }
            continue;
        };
        if !os.skip.unwrap_or(false) {
            walk.add(&os.obj, &value);
        }
        walk.select(&os.obj, &value, &os.select_set)?;
    }

    let mut out: Vec<ObjectContent> = walk
        .found
        .iter()
        .filter_map(|(r, v)| object_content(r, v, &spec.prop_set))
        .collect();
    out.extend(absent);
    Ok(out)
}

/// Renders collected contents as the snapshot a filter diffs against.
pub fn snapshot(content: &ObjectContent) -> Snapshot {
    content
        .prop_set
        .iter()
        .map(|p| (p.name.clone(), p.val.clone()))
        .collect()
}

fn retrieve(
    call: &mut Call<'_>,
    this: &MoRef,
    specs: &[PropertyFilterSpec],
) -> Result<Vec<ObjectContent>, MethodFault> {
    let session = call.session.clone();
    resolve(call.inv, session.as_deref().unwrap_or_default(), this)?;
    let mut out = Vec::new();
    for spec in specs {
        out.extend(collect(call.inv, session.as_deref(), spec, Missing::Fail)?);
    }
    Ok(out)
}

/// Returns up to `max` objects, storing the rest under a new token.
fn page(
    collector: &mut Collector,
    mut objects: Vec<ObjectContent>,
    max: Option<usize>,
) -> MethodResult {
    if objects.is_empty() {
        return Ok(Value::Null);
    }
    let mut token = None;
    if let Some(max) = max.filter(|m| *m > 0) {
        if objects.len() > max {
            let rest = objects.split_off(max);
            let t = uuid::Uuid::new_v4().to_string();
            collector.tokens.insert(t.clone(), (max, rest));
            token = Some(t);
        }
    }
    encode(&RetrieveResult { token, objects })
}

fn collector_dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    let key = call.session.clone().unwrap_or_default();
    match method {
        "RetrieveProperties" => {
            let req: RetrievePropertiesRequest = decode(args)?;
            encode(&retrieve(call, this, &req.spec_set)?)
        }
        "RetrievePropertiesEx" => {
            let req: RetrievePropertiesExRequest = decode(args)?;
            let objects = retrieve(call, this, &req.spec_set)?;
            let pc = resolve(call.inv, &key, this)?;
            let collector = collector_mut(call.inv, &key, &pc)?;
            let max = req.options.max_objects.map(|m| m.max(0) as usize);
            page(collector, objects, max)
        }
        "ContinueRetrievePropertiesEx" => {
            let req: TokenRequest = decode(args)?;
            let pc = resolve(call.inv, &key, this)?;
            let collector = collector_mut(call.inv, &key, &pc)?;
            let (max, objects) = collector
                .tokens
                .remove(&req.token)
                .ok_or_else(|| MethodFault::invalid_property(req.token.clone()))?;
            page(collector, objects, Some(max))
        }
        "CancelRetrievePropertiesEx" => {
            let req: TokenRequest = decode(args)?;
            let pc = resolve(call.inv, &key, this)?;
            let collector = collector_mut(call.inv, &key, &pc)?;
            collector
                .tokens
                .remove(&req.token)
                .ok_or_else(|| MethodFault::invalid_property(req.token))?;
            Ok(Value::Null)
        }
        "CreateFilter" => {
            let req: CreateFilterRequest = decode(args)?;
            let pc = resolve(call.inv, &key, this)?;
            collect(call.inv, Some(&key), &req.spec, Missing::Fail)?;
            let filter = Inventory::scoped_ref(&key, "PropertyFilter");
            call.inv.scoped.insert(
                filter.clone(),
                Scoped {
                    owner: key.clone(),
                    object: ScopedObject::Filter(Filter {
                        collector: pc.clone(),
                        spec: req.spec,
                        partial_updates: req.partial_updates,
                        reported: BTreeMap::new(),
                    }),
                },
            );
            collector_mut(call.inv, &key, &pc)?.filters.push(filter.clone());
            call.inv.registry.touch();
            encode(&filter)
        }
        "CreatePropertyCollector" => {
            resolve(call.inv, &key, this)?;
            let pc = Inventory::scoped_ref(&key, "PropertyCollector");
            call.inv.scoped.insert(
                pc.clone(),
                Scoped {
                    owner: key,
                    object: ScopedObject::Collector(Collector::new()),
                },
            );
            encode(&pc)
        }
        "DestroyPropertyCollector" => {
            let pc = resolve(call.inv, &key, this)?;
            let collector = collector_mut(call.inv, &key, &pc)?;
            collector.cancel.notify_waiters();
            let filters = std::mem::take(&mut collector.filters);
            for f in filters {
                call.inv.scoped.remove(&f);
            }
            call.inv.scoped.remove(&pc);
            Ok(Value::Null)
        }
        "CancelWaitForUpdates" => {
            let pc = resolve(call.inv, &key, this)?;
            collector_mut(call.inv, &key, &pc)?.cancel.notify_waiters();
            Ok(Value::Null)
        }
        "CheckForUpdates" => {
            let req: WaitForUpdatesExRequest = decode(args)?;
            let pc = resolve(call.inv, &key, this)?;
            let reset = wait::is_reset(req.version.as_deref());
            let set = wait::updates(
                call.inv,
                &key,
                &pc,
                reset,
                wait::MAX_OBJECT_UPDATES,
            )?;
            encode(&set)
        }
        _ => Err(method_not_found(this, method)),
    }
}

fn filter_dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
) -> MethodResult {
    let key = call.session.clone().unwrap_or_default();
    let collector = match call.inv.scoped(Some(&key), this)? {
        ScopedObject::Filter(f) => f.collector.clone(),
        _ => return Err(MethodFault::not_found(this.clone())),
    };
    match method {
        "DestroyPropertyFilter" => {
            call.inv.scoped.remove(this);
            if let Ok(c) = collector_mut(call.inv, &key, &collector) {
                c.filters.retain(|f| f != this);
            }
            call.inv.registry.touch();
            Ok(Value::Null)
        }
        _ => Err(method_not_found(this, method)),
    }
}

pub fn dispatch(
    call: &mut Call<'_>,
    this: &MoRef,
    method: &str,
    args: Value,
) -> MethodResult {
    match this.kind.as_str() {
        "PropertyFilter" => filter_dispatch(call, this, method),
        _ => collector_dispatch(call, this, method, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::testing::{context, invoke_as, login};
    use vim_api_types::property::ObjectSpec;

    fn pc() -> MoRef {
        MoRef::new("PropertyCollector", inventory::PROPERTY_COLLECTOR)
    }

    fn folder_traversal() -> Vec<SelectionSpec> {
        vec![SelectionSpec::TraversalSpec(TraversalSpec {
            name: Some("visitFolders".into()),
            kind: "Folder".into(),
            path: "childEntity".into(),
            skip: Some(false),
            select_set: vec![
                SelectionSpec::named("visitFolders"),
                SelectionSpec::TraversalSpec(TraversalSpec {
                    name: Some("dcToVm".into()),
                    kind: "Datacenter".into(),
                    path: "vmFolder".into(),
                    skip: Some(false),
                    select_set: vec![SelectionSpec::named("visitFolders")],
                }),
            ],
        })]
    }

    #[tokio::test]
    async fn traversal_collects_every_vm_once() {
        let ctx = context();
        let key = login(&ctx).await;
        let root = ctx.inventory.lock().await.registry.root_folder().clone();
        let spec = PropertyFilterSpec {
            prop_set: vec![PropertySpec::new("VirtualMachine", &["name", "runtime.powerState"])],
            object_set: vec![ObjectSpec {
                obj: root,
                skip: Some(true),
                select_set: folder_traversal(),
            }],
            report_missing_objects_in_results: None,
        };
        let result = invoke_as(
            &ctx,
            Some(&key),
            &pc(),
            "RetrievePropertiesEx",
            json!({"specSet": [spec]}),
        )
        .await
        .unwrap();
        let result: RetrieveResult = serde_json::from_value(result).unwrap();

        let inv = ctx.inventory.lock().await;
        let vms = inv.registry.all_of("VirtualMachine");
        assert_eq!(result.objects.len(), vms.len());
        let mut names = BTreeSet::new();
        for o in &result.objects {
            assert_eq!(o.obj.kind, "VirtualMachine");
            assert!(names.insert(o.get("name").unwrap().as_str().unwrap().to_string()));
            assert_eq!(o.get("runtime.powerState").unwrap(), "poweredOn");
        }
    }

    #[tokio::test]
    async fn missing_objects_and_properties() {
        let ctx = context();
        let key = login(&ctx).await;
        let gone = MoRef::new("VirtualMachine", "vm-999999");
        let mut spec = PropertyFilterSpec {
            prop_set: vec![PropertySpec::new("VirtualMachine", &["name"])],
            object_set: vec![ObjectSpec::new(gone.clone())],
            report_missing_objects_in_results: None,
        };
        let err = invoke_as(
            &ctx,
            Some(&key),
            &pc(),
            "RetrieveProperties",
            json!({"specSet": [spec.clone()]}),
        )
        .await
        .unwrap_err();
        assert_eq!(err, MethodFault::not_found(gone.clone()));

        spec.report_missing_objects_in_results = Some(true);
        let found = invoke_as(
            &ctx,
            Some(&key),
            &pc(),
            "RetrieveProperties",
            json!({"specSet": [spec]}),
        )
        .await
        .unwrap();
        let found: Vec<ObjectContent> = serde_json::from_value(found).unwrap();
        assert_eq!(found[0].obj, gone);
        assert_eq!(found[0].missing_set[0].fault.fault, MethodFault::not_found(gone));

        let vm = ctx.inventory.lock().await.registry.all_of("VirtualMachine")[0].clone();
        let spec = PropertyFilterSpec {
            prop_set: vec![PropertySpec::new("VirtualMachine", &["name", "nope.nope"])],
            object_set: vec![ObjectSpec::new(vm)],
            report_missing_objects_in_results: None,
        };
        let found = invoke_as(
            &ctx,
            Some(&key),
            &pc(),
            "RetrieveProperties",
            json!({"specSet": [spec]}),
        )
        .await
        .unwrap();
        let found: Vec<ObjectContent> = serde_json::from_value(found).unwrap();
        assert_eq!(found[0].prop_set.len(), 1);
        assert_eq!(found[0].missing_set[0].path, "nope.nope");
    }

    #[tokio::test]
    async fn paging_with_tokens() {
        let ctx = context();
        let key = login(&ctx).await;
        let hosts = ctx.inventory.lock().await.registry.all_of("HostSystem");
        assert!(hosts.len() > 2);
        let spec = PropertyFilterSpec {
            prop_set: vec![PropertySpec::new("HostSystem", &["name"])],
            object_set: hosts.iter().cloned().map(ObjectSpec::new).collect(),
            report_missing_objects_in_results: None,
        };
        let first = invoke_as(
            &ctx,
            Some(&key),
            &pc(),
            "RetrievePropertiesEx",
            json!({"specSet": [spec], "options": {"maxObjects": 1}}),
        )
        .await
        .unwrap();
        let first: RetrieveResult = serde_json::from_value(first).unwrap();
        assert_eq!(first.objects.len(), 1);
        let first_token = first.token.clone().unwrap();
        let mut seen: BTreeSet<String> = first.objects.iter().map(|o| o.obj.value.clone()).collect();
        let mut token = first.token;
        let mut pages = 1;
        while let Some(t) = token.take() {
            let page = invoke_as(
                &ctx,
                Some(&key),
                &pc(),
                "ContinueRetrievePropertiesEx",
                json!({"token": t}),
            )
            .await
            .unwrap();
            let page: RetrieveResult = serde_json::from_value(page).unwrap();
            assert!(page.objects.len() <= 1);
            seen.extend(page.objects.iter().map(|o| o.obj.value.clone()));
            token = page.token;
            pages += 1;
        }
        assert_eq!(pages, hosts.len());
        assert_eq!(seen, hosts.iter().map(|h| h.value.clone()).collect::<BTreeSet<_>>());

        let stale = invoke_as(
            &ctx,
            Some(&key),
            &pc(),
            "ContinueRetrievePropertiesEx",
            json!({"token": first_token}),
        )
        .await
        .unwrap_err();
        assert_eq!(stale, MethodFault::invalid_property(first_token));
    }

    #[tokio::test]
    async fn unknown_selection_name() {
        let ctx = context();
        let key = login(&ctx).await;
        let root = ctx.inventory.lock().await.registry.root_folder().clone();
        let spec = PropertyFilterSpec {
            prop_set: vec![PropertySpec::new("Folder", &["name"])],
            object_set: vec![ObjectSpec {
                obj: root,
                skip: None,
                select_set: vec![SelectionSpec::named("nowhere")],
            }],
            report_missing_objects_in_results: None,
        };
        let err = invoke_as(
            &ctx,
            Some(&key),
            &pc(),
            "RetrieveProperties",
            json!({"specSet": [spec]}),
        )
        .await
        .unwrap_err();
        assert_eq!(err, MethodFault::invalid_argument("selectSet"));
    }

    #[test]
    fn all_properties_skip_nulls() {
        let obj = MoRef::new("Folder", "group-d1");
        let value = json!({"name": "Datacenters", "parent": null, "childEntity": []});
        let content =
            object_content(&obj, &value, &[PropertySpec::all("ManagedEntity")]).unwrap();
        assert_eq!(content.prop_set.len(), 2);
        assert!(content.get("parent").is_none());
        assert!(object_content(&obj, &value, &[PropertySpec::all("VirtualMachine")])
            .is_none());
    }
}

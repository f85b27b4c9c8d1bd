// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use dropshot::{endpoint, HttpError, HttpResponseOk, Query, RequestContext};
use vim_api_types::mo::VirtualMachinePowerState;
use vim_api_types::vapi::vcenter::{PowerState, VmFilter, VmSummary};

use super::authorize;
use crate::registry::Registry;
use crate::Context;

fn power_state(state: VirtualMachinePowerState) -> PowerState {
    match state {
        VirtualMachinePowerState::PoweredOff => PowerState::PoweredOff,
        VirtualMachinePowerState::PoweredOn => PowerState::PoweredOn,
        VirtualMachinePowerState::Suspended => PowerState::Suspended,
    }
}

/// Summaries of the VMs matching `filter`, templates excluded.
pub fn summaries(reg: &Registry, filter: &VmFilter) -> Vec<VmSummary> {
    let names: Option<Vec<&str>> = filter
        .names
        .as_deref()
        .map(|n| n.split(',').map(str::trim).filter(|n| !n.is_empty()).collect());
    reg.all_of("VirtualMachine")
        .iter()
        .filter_map(|r| reg.vm(r).ok().map(|vm| (r, vm)))
        .filter(|(_, vm)| !vm.config.template)
        .filter(|(_, vm)| {
            names.as_ref().map_or(true, |n| n.contains(&vm.entity.name.as_str()))
        })
        .map(|(r, vm)| VmSummary {
            vm: r.value.clone(),
            name: vm.entity.name.clone(),
            power_state: power_state(vm.runtime.power_state),
            cpu_count: Some(i64::from(vm.config.hardware.num_cpu)),
            memory_size_mib: Some(i64::from(vm.config.hardware.memory_mb)),
        })
        .filter(|s| filter.power_states.map_or(true, |p| p == s.power_state))
        .collect()
}

#[endpoint {
    method = GET,
    path = "/api/vcenter/vm",
}]
pub async fn vm_list(
    rqctx: RequestContext<Arc<Context>>,
    query: Query<VmFilter>,
) -> std::result::Result<HttpResponseOk<Vec<VmSummary>>, HttpError> {
    let _state = authorize(&rqctx).await?;
    let inv = rqctx.context().inventory.lock().await;
    Ok(HttpResponseOk(summaries(&inv.registry, &query.into_inner())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use crate::vim::option::Settings;
    use vcsim_config_toml::Model;

    #[test]
    fn filter_by_name_and_power() {
        let mut inv = Inventory::new(false, Settings::vpx());
        crate::model::populate(&mut inv, &Model::vpx()).unwrap();

        let all = summaries(&inv.registry, &VmFilter::default());
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|s| s.power_state == PowerState::PoweredOn));
        assert_eq!(all[0].cpu_count, Some(1));
        assert_eq!(all[0].memory_size_mib, Some(32));

        let some = summaries(
            &inv.registry,
            &VmFilter { names: Some("DC0_H0_VM0, DC0_H0_VM1".into()), power_states: None },
        );
        assert_eq!(some.len(), 2);

        let none = summaries(
            &inv.registry,
            &VmFilter { names: None, power_states: Some(PowerState::PoweredOff) },
        );
        assert!(none.is_empty());
    }
}

use super::records::{Subnet, Vlan};

/// Group subnets by their `vlanId`, keeping first-seen order.
pub fn derive_vlans(subnets: &[Subnet]) -> Vec<Vlan> {
    let mut vlans: Vec<Vlan> = Vec::new();

    for subnet in subnets {
        let Some(vlan_id) = subnet
            .vlan_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            continue;
        };

        let position = match vlans.iter().position(|v| v.id == vlan_id) {
            Some(pos) => pos,
            None => {
                vlans.push(Vlan {
                    id: vlan_id.to_string(),
                    vlan_number: vlan_id.parse().unwrap_or(0),
                    name: String::new(),
                    description: String::new(),
                    subnets: Vec::new(),
                });
                vlans.len() - 1
            }
        };

        let vlan = &mut vlans[position];
        if vlan.name.is_empty()
            && let Some(name) = subnet.vlan_name.as_deref().filter(|n| !n.is_empty())
        {
            vlan.name = name.to_string();
        }
        if vlan.description.is_empty()
            && let Some(desc) = subnet
                .vlan_description
                .as_deref()
                .filter(|d| !d.is_empty())
        {
            vlan.description = desc.to_string();
        }
        vlan.subnets.push(subnet.id.clone());
    }

    vlans
}

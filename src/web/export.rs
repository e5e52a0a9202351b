//! XLSX export: one worksheet per record collection plus the derived VLANs.

use rust_xlsxwriter::{Format, Workbook};

use crate::error::AppError;
use crate::model::{Dataset, derive_vlans};

pub const CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const FILE_NAME: &str = "netkeeper.xlsx";

fn enum_text<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn port(value: Option<u16>) -> String {
    value.map(|p| p.to_string()).unwrap_or_default()
}

fn yes_no(value: bool) -> String {
    if value { "Yes" } else { "No" }.to_string()
}

/// Write a bold header row, the data rows, and set column widths.
fn write_sheet(
    workbook: &mut Workbook,
    name: &str,
    columns: &[(&str, f64)],
    rows: Vec<Vec<String>>,
) -> Result<(), AppError> {
    let header_format = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(name)?;

    for (col, (header, width)) in columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &header_format)?;
        worksheet.set_column_width(col as u16, *width)?;
    }
    for (row_idx, row) in rows.iter().enumerate() {
        let row_num = (row_idx + 1) as u32;
        for (col, value) in row.iter().enumerate() {
            worksheet.write_string(row_num, col as u16, value)?;
        }
    }
    worksheet.set_freeze_panes(1, 0)?;
    Ok(())
}

pub fn build_workbook(data: &Dataset) -> Result<Vec<u8>, AppError> {
    let mut workbook = Workbook::new();

    write_sheet(
        &mut workbook,
        "Subnets",
        &[
            ("Name", 24.0),
            ("CIDR", 18.0),
            ("Gateway", 16.0),
            ("VLAN", 8.0),
            ("Used", 8.0),
            ("Total", 10.0),
            ("DHCP", 8.0),
            ("DHCP Range", 30.0),
            ("Description", 40.0),
        ],
        data.subnets
            .iter()
            .map(|s| {
                let range = match (&s.dhcp_start, &s.dhcp_end) {
                    (Some(start), Some(end)) if s.dhcp_enabled => format!("{} - {}", start, end),
                    _ => String::new(),
                };
                vec![
                    s.name.clone(),
                    s.cidr.clone(),
                    s.gateway.clone(),
                    opt(&s.vlan_id),
                    s.used_ips.to_string(),
                    s.total_ips.to_string(),
                    yes_no(s.dhcp_enabled),
                    range,
                    s.description.clone(),
                ]
            })
            .collect(),
    )?;

    write_sheet(
        &mut workbook,
        "IP Addresses",
        &[
            ("Address", 16.0),
            ("Hostname", 24.0),
            ("Subnet", 20.0),
            ("MAC", 20.0),
            ("Status", 10.0),
            ("Device Type", 12.0),
            ("Owner", 16.0),
            ("Online", 8.0),
            ("Notes", 40.0),
        ],
        data.ip_addresses
            .iter()
            .map(|ip| {
                let subnet = data
                    .subnets
                    .iter()
                    .find(|s| s.id == ip.subnet_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                vec![
                    ip.address.clone(),
                    ip.hostname.clone(),
                    subnet,
                    ip.mac.clone(),
                    enum_text(&ip.status),
                    ip.device_type.as_ref().map(enum_text).unwrap_or_default(),
                    ip.owner.clone(),
                    ip.is_online.map(yes_no).unwrap_or_else(|| "-".to_string()),
                    opt(&ip.notes),
                ]
            })
            .collect(),
    )?;

    write_sheet(
        &mut workbook,
        "NAT Rules",
        &[
            ("Protocol", 10.0),
            ("External IP", 16.0),
            ("External Port", 14.0),
            ("Internal IP", 16.0),
            ("Internal Port", 14.0),
            ("Description", 40.0),
        ],
        data.nat_rules
            .iter()
            .map(|n| {
                vec![
                    enum_text(&n.protocol),
                    n.external_ip.clone(),
                    port(n.external_port),
                    n.internal_ip.clone(),
                    port(n.internal_port),
                    n.description.clone(),
                ]
            })
            .collect(),
    )?;

    // Passwords stay out of the export.
    write_sheet(
        &mut workbook,
        "WiFi",
        &[
            ("SSID", 24.0),
            ("Security", 12.0),
            ("Band", 8.0),
            ("VLAN", 8.0),
            ("Active", 8.0),
            ("Description", 40.0),
        ],
        data.wifi_networks
            .iter()
            .map(|w| {
                vec![
                    w.ssid.clone(),
                    enum_text(&w.security),
                    enum_text(&w.band),
                    opt(&w.vlan_id),
                    yes_no(w.is_active),
                    w.description.clone(),
                ]
            })
            .collect(),
    )?;

    write_sheet(
        &mut workbook,
        "Applications",
        &[
            ("Name", 24.0),
            ("URL", 40.0),
            ("Host", 20.0),
            ("Description", 40.0),
        ],
        data.applications
            .iter()
            .map(|a| {
                vec![
                    a.name.clone(),
                    a.url.clone(),
                    opt(&a.host),
                    opt(&a.description),
                ]
            })
            .collect(),
    )?;

    write_sheet(
        &mut workbook,
        "VLANs",
        &[
            ("VLAN", 8.0),
            ("Name", 24.0),
            ("Description", 40.0),
            ("Subnets", 40.0),
        ],
        derive_vlans(&data.subnets)
            .into_iter()
            .map(|v| {
                let names: Vec<String> = v
                    .subnets
                    .iter()
                    .filter_map(|id| data.subnets.iter().find(|s| &s.id == id))
                    .map(|s| s.name.clone())
                    .collect();
                vec![v.id, v.name, v.description, names.join(", ")]
            })
            .collect(),
    )?;

    Ok(workbook.save_to_buffer()?)
}

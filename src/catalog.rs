//! The fixed catalog of interfaces loaded on every run

use crate::types::TableSpec;

/// Build the catalog of tables a run loads, in load order
///
/// Each entry names the published table, the module that owns the source
/// interface, and the interface path records are extracted from.
pub fn default_catalog() -> Vec<TableSpec> {
    vec![
        TableSpec::new("circulation_loans", "mod-circulation-storage", "/loan-storage/loans"),
        TableSpec::new(
            "circulation_requests",
            "mod-circulation-storage",
            "/request-storage/requests",
        ),
        TableSpec::new("finance_groups", "mod-finance-storage", "/finance-storage/groups"),
        TableSpec::new("inventory_holdings", "mod-inventory-storage", "/holdings-storage/holdings"),
        TableSpec::new("inventory_instances", "mod-inventory-storage", "/instance-storage/instances"),
        TableSpec::new("inventory_items", "mod-inventory-storage", "/item-storage/items"),
        TableSpec::new("po_lines", "mod-orders-storage", "/orders-storage/po-lines"),
        TableSpec::new("agreements", "mod-agreements", "/erm/sas"),
        TableSpec::new("user_groups", "mod-users", "/groups"),
        TableSpec::new("user_users", "mod-users", "/users"),
    ]
}

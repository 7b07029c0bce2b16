// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Columns of a supplier result row, named by their SPARQL variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SupplierField {
    SupplierName,
    SupplierType,
    SupplierId,
    Address,
    City,
    Email,
    Phone,
    Website,
    Country,
    Risk,
}

impl SupplierField {
    pub const ALL: [SupplierField; 10] = [
        SupplierField::SupplierName,
        SupplierField::SupplierType,
        SupplierField::SupplierId,
        SupplierField::Address,
        SupplierField::City,
        SupplierField::Email,
        SupplierField::Phone,
        SupplierField::Website,
        SupplierField::Country,
        SupplierField::Risk,
    ];

    /// Fields masked before rows are sent to the language model.
    pub const SENSITIVE: [SupplierField; 6] = [
        SupplierField::SupplierName,
        SupplierField::SupplierId,
        SupplierField::Address,
        SupplierField::Email,
        SupplierField::Phone,
        SupplierField::Website,
    ];

    pub fn variable(self) -> &'static str {
        match self {
            SupplierField::SupplierName => "supplierName",
            SupplierField::SupplierType => "supplierType",
            SupplierField::SupplierId => "supplierId",
            SupplierField::Address => "address",
            SupplierField::City => "city",
            SupplierField::Email => "email",
            SupplierField::Phone => "phone",
            SupplierField::Website => "website",
            SupplierField::Country => "country",
            SupplierField::Risk => "risk",
        }
    }

    pub fn from_variable(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.variable() == name)
    }

    pub fn is_sensitive(self) -> bool {
        Self::SENSITIVE.contains(&self)
    }
}

impl fmt::Display for SupplierField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.variable())
    }
}

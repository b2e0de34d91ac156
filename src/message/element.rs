// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;

use super::REVERSE_PEN;

/// Abstract data type of an information element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Unsigned,
    Signed,
    Float,
    Boolean,
    MacAddress,
    OctetArray,
    String,
    DateTimeSeconds,
    DateTimeMilliseconds,
    Ipv4Address,
    Ipv6Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDef {
    pub name: String,
    pub data_type: ElementType,
}

/// Resolves `(enterprise, id)` pairs to element definitions.
///
/// Reverse (biflow) elements share the forward definitions and are
/// reported under the `iana@reverse` scope.
#[derive(Debug, Clone)]
pub struct ElementRegistry {
    scopes: HashMap<u32, String>,
    elements: HashMap<(u32, u16), ElementDef>,
}

impl Default for ElementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementRegistry {
    /// Registry that only knows the IANA scope name.
    pub fn new() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(0, "iana".to_string());
        scopes.insert(REVERSE_PEN, "iana@reverse".to_string());
        Self {
            scopes,
            elements: HashMap::new(),
        }
    }

    /// Registry preloaded with the IANA elements commonly found in flow exports.
    pub fn with_iana_defaults() -> Self {
        use ElementType::{
            Boolean, DateTimeMilliseconds, DateTimeSeconds, Float, Ipv4Address, Ipv6Address,
            MacAddress, OctetArray, Signed, Unsigned,
        };

        let mut registry = Self::new();
        let iana: &[(u16, &str, ElementType)] = &[
            (1, "octetDeltaCount", Unsigned),
            (2, "packetDeltaCount", Unsigned),
            (4, "protocolIdentifier", Unsigned),
            (5, "ipClassOfService", Unsigned),
            (6, "tcpControlBits", Unsigned),
            (7, "sourceTransportPort", Unsigned),
            (8, "sourceIPv4Address", Ipv4Address),
            (9, "sourceIPv4PrefixLength", Unsigned),
            (10, "ingressInterface", Unsigned),
            (11, "destinationTransportPort", Unsigned),
            (12, "destinationIPv4Address", Ipv4Address),
            (13, "destinationIPv4PrefixLength", Unsigned),
            (14, "egressInterface", Unsigned),
            (15, "ipNextHopIPv4Address", Ipv4Address),
            (16, "bgpSourceAsNumber", Unsigned),
            (17, "bgpDestinationAsNumber", Unsigned),
            (21, "flowEndSysUpTime", Unsigned),
            (22, "flowStartSysUpTime", Unsigned),
            (27, "sourceIPv6Address", Ipv6Address),
            (28, "destinationIPv6Address", Ipv6Address),
            (32, "icmpTypeCodeIPv4", Unsigned),
            (56, "sourceMacAddress", MacAddress),
            (58, "vlanId", Unsigned),
            (60, "ipVersion", Unsigned),
            (61, "flowDirection", Unsigned),
            (80, "destinationMacAddress", MacAddress),
            (82, "interfaceName", ElementType::String),
            (85, "octetTotalCount", Unsigned),
            (86, "packetTotalCount", Unsigned),
            (95, "applicationId", OctetArray),
            (96, "applicationName", ElementType::String),
            (136, "flowEndReason", Unsigned),
            (148, "flowId", Unsigned),
            (149, "observationDomainId", Unsigned),
            (150, "flowStartSeconds", DateTimeSeconds),
            (151, "flowEndSeconds", DateTimeSeconds),
            (152, "flowStartMilliseconds", DateTimeMilliseconds),
            (153, "flowEndMilliseconds", DateTimeMilliseconds),
            (160, "systemInitTimeMilliseconds", DateTimeMilliseconds),
            (176, "icmpTypeIPv4", Unsigned),
            (177, "icmpCodeIPv4", Unsigned),
            (210, "paddingOctets", OctetArray),
            (239, "biflowDirection", Unsigned),
            (276, "dataRecordsReliability", Boolean),
            (313, "ipHeaderPacketSection", OctetArray),
            (325, "samplingProbability", Float),
            (434, "mibObjectValueInteger", Signed),
        ];
        for (id, name, data_type) in iana {
            registry.register(0, *id, *name, *data_type);
        }
        registry
    }

    pub fn register_scope(&mut self, enterprise: u32, name: impl Into<String>) {
        self.scopes.insert(enterprise, name.into());
    }

    pub fn register(
        &mut self,
        enterprise: u32,
        id: u16,
        name: impl Into<String>,
        data_type: ElementType,
    ) {
        self.elements.insert(
            (enterprise, id),
            ElementDef {
                name: name.into(),
                data_type,
            },
        );
    }

    pub fn lookup(&self, enterprise: u32, id: u16) -> Option<&ElementDef> {
        let enterprise = if enterprise == REVERSE_PEN { 0 } else { enterprise };
        self.elements.get(&(enterprise, id))
    }

    pub fn scope_name(&self, enterprise: u32) -> Option<&str> {
        self.scopes.get(&enterprise).map(String::as_str)
    }
}

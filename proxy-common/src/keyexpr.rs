use crate::rows::RegisterType;

/// Default key expression prefix for all proxy collections.
pub const KEY_PREFIX: &str = "modbusproxy";

/// Segment holding register data rows.
pub const DATA_SEGMENT: &str = "data";

/// Segment holding slave configuration rows.
pub const RTUS_SEGMENT: &str = "rtus";

/// Builder for the proxy's key expressions.
///
/// Data rows live at
/// `<prefix>/data/<ip_address>/<ip_port>/<slave_id>/<register_type>/<address>`
/// and configuration rows at `<prefix>/rtus/<ip_address>/<ip_port>/<slave_id>`.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

impl KeyExprBuilder {
    /// Create a builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of a single data row.
    ///
    /// # Example
    /// ```
    /// use proxy_common::keyexpr::KeyExprBuilder;
    /// use proxy_common::rows::RegisterType;
    ///
    /// let builder = KeyExprBuilder::default();
    /// let key = builder.data_key("192.168.1.200", 502, 1, RegisterType::Input, 7);
    /// assert_eq!(key, "modbusproxy/data/192.168.1.200/502/1/ir/7");
    /// ```
    pub fn data_key(
        &self,
        ip_address: &str,
        ip_port: u16,
        slave_id: u8,
        register_type: RegisterType,
        address: u32,
    ) -> String {
        format!(
            "{}/{}",
            self.data_type_prefix(ip_address, ip_port, slave_id, register_type),
            address
        )
    }

    /// Wildcard over every address of one register type of one slave.
    ///
    /// # Example
    /// ```
    /// use proxy_common::keyexpr::KeyExprBuilder;
    /// use proxy_common::rows::RegisterType;
    ///
    /// let builder = KeyExprBuilder::new("site");
    /// let key = builder.data_type_wildcard("10.0.0.1", 502, 3, RegisterType::Coil);
    /// assert_eq!(key, "site/data/10.0.0.1/502/3/co/*");
    /// ```
    pub fn data_type_wildcard(
        &self,
        ip_address: &str,
        ip_port: u16,
        slave_id: u8,
        register_type: RegisterType,
    ) -> String {
        format!(
            "{}/*",
            self.data_type_prefix(ip_address, ip_port, slave_id, register_type)
        )
    }

    fn data_type_prefix(
        &self,
        ip_address: &str,
        ip_port: u16,
        slave_id: u8,
        register_type: RegisterType,
    ) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}",
            self.prefix,
            DATA_SEGMENT,
            ip_address,
            ip_port,
            slave_id,
            register_type.as_str()
        )
    }

    /// Key of a slave configuration row.
    pub fn rtu_key(&self, ip_address: &str, ip_port: u16, slave_id: u8) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.prefix, RTUS_SEGMENT, ip_address, ip_port, slave_id
        )
    }

    /// Wildcard over every configuration row.
    ///
    /// # Example
    /// ```
    /// use proxy_common::keyexpr::KeyExprBuilder;
    ///
    /// assert_eq!(KeyExprBuilder::default().rtus_wildcard(), "modbusproxy/rtus/**");
    /// ```
    pub fn rtus_wildcard(&self) -> String {
        format!("{}/{}/**", self.prefix, RTUS_SEGMENT)
    }

    /// Wildcard over the configuration rows of one proxy address.
    pub fn rtus_for_address(&self, ip_address: &str) -> String {
        format!("{}/{}/{}/**", self.prefix, RTUS_SEGMENT, ip_address)
    }

    /// Key for proxy status reports.
    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }
}

/// Parse a data-row key to extract its register address.
///
/// Returns `None` if the key is not a data-row key.
pub fn parse_data_key(key: &str) -> Option<ParsedDataKey<'_>> {
    let parts: Vec<&str> = key.split('/').collect();
    let data_pos = parts.iter().rposition(|p| *p == DATA_SEGMENT)?;
    let tail = &parts[data_pos + 1..];

    if tail.len() != 5 {
        return None;
    }

    Some(ParsedDataKey {
        ip_address: tail[0],
        ip_port: tail[1].parse().ok()?,
        slave_id: tail[2].parse().ok()?,
        register_type: tail[3].parse().ok()?,
        address: tail[4].parse().ok()?,
    })
}

/// Parsed components of a data-row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDataKey<'a> {
    pub ip_address: &'a str,
    pub ip_port: u16,
    pub slave_id: u8,
    pub register_type: RegisterType,
    pub address: u32,
}

use super::rpc::{ServiceDescriptor, ServiceDirectory};
use crate::error::CameraError;
use tracing::{debug, info};

/// Identity and service list parsed from the device description document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub friendly_name: String,
    pub manufacturer: String,
    pub services: Vec<ServiceDescriptor>,
}

impl DeviceDescription {
    /// Fetch and parse the description behind an SSDP location
    pub async fn fetch(client: &reqwest::Client, location: &str) -> Result<Self, CameraError> {
        debug!("Fetching device description from {}", location);

        let response = client
            .get(location)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CameraError::DiscoveryFailed {
                details: format!("failed to fetch description '{}': {}", location, e),
            })?;
        let xml = response
            .text()
            .await
            .map_err(|e| CameraError::DiscoveryFailed {
                details: format!("failed to read description '{}': {}", location, e),
            })?;

        let description = Self::parse(&xml)?;
        info!(
            "Camera '{}' by {} offers services {:?}",
            description.friendly_name,
            description.manufacturer,
            description
                .services
                .iter()
                .map(|s| s.service_type.as_str())
                .collect::<Vec<_>>()
        );
        Ok(description)
    }

    pub fn parse(xml: &str) -> Result<Self, CameraError> {
        let device = element_content(xml, "device").unwrap_or(xml);

        let friendly_name =
            element_text(device, "friendlyName").ok_or_else(|| missing("friendlyName"))?;
        let manufacturer = element_text(device, "manufacturer").unwrap_or_default();

        let mut services = Vec::new();
        for service in elements(device, "X_ScalarWebAPI_Service") {
            let service_type = element_text(service, "X_ScalarWebAPI_ServiceType")
                .ok_or_else(|| missing("X_ScalarWebAPI_ServiceType"))?;
            let action_list_url = element_text(service, "X_ScalarWebAPI_ActionList_URL")
                .ok_or_else(|| missing("X_ScalarWebAPI_ActionList_URL"))?;

            let base_url = format!("{}/{}", action_list_url.trim_end_matches('/'), service_type);
            services.push(ServiceDescriptor::new(service_type, base_url));
        }

        if services.is_empty() {
            return Err(missing("X_ScalarWebAPI_Service"));
        }

        Ok(Self {
            friendly_name,
            manufacturer,
            services,
        })
    }

    pub fn directory(&self) -> ServiceDirectory {
        ServiceDirectory::new(self.services.clone())
    }
}

fn missing(tag: &str) -> CameraError {
    CameraError::DiscoveryFailed {
        details: format!("device description lacks <{}>", tag),
    }
}

/// Find the next opening tag named `name`, with or without a namespace prefix.
/// Returns (tag start, content start).
fn find_open_tag(xml: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let mut cursor = from;
    while let Some(offset) = xml[cursor..].find('<') {
        let start = cursor + offset;
        let rest = &xml[start + 1..];
        let end = rest.find('>')?;
        let tag = rest[..end].trim_end_matches('/');
        let tag_name = tag.split_whitespace().next().unwrap_or("");
        let local_name = tag_name.rsplit(':').next().unwrap_or(tag_name);

        if local_name == name && !tag_name.starts_with('/') {
            return Some((start, start + 1 + end + 1));
        }
        cursor = start + 1;
    }
    None
}

/// Find the closing tag matching an element opened just before `from`,
/// skipping nested elements of the same name. Returns (tag start, tag end).
fn find_close_tag(xml: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let mut cursor = from;
    let mut depth = 0usize;
    while let Some(offset) = xml[cursor..].find('<') {
        let start = cursor + offset;
        let rest = &xml[start + 1..];
        let end = rest.find('>')?;
        let tag = rest[..end].trim();
        cursor = start + 1 + end + 1;

        let (closing, tag) = match tag.strip_prefix('/') {
            Some(tag) => (true, tag),
            None => (false, tag),
        };
        let tag_name = tag.split_whitespace().next().unwrap_or("").trim_end_matches('/');
        let local_name = tag_name.rsplit(':').next().unwrap_or(tag_name);
        if local_name != name {
            continue;
        }

        if !closing {
            if !tag.ends_with('/') {
                depth += 1;
            }
        } else if depth == 0 {
            return Some((start, cursor));
        } else {
            depth -= 1;
        }
    }
    None
}

fn element_content<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let (_, content_start) = find_open_tag(xml, name, 0)?;
    let (content_end, _) = find_close_tag(xml, name, content_start)?;
    Some(&xml[content_start..content_end])
}

/// Iterate over the contents of all non-nested `name` elements
fn elements<'a>(xml: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let mut cursor = 0;
    std::iter::from_fn(move || {
        let (_, content_start) = find_open_tag(xml, name, cursor)?;
        let (content_end, tag_end) = find_close_tag(xml, name, content_start)?;
        cursor = tag_end;
        Some(&xml[content_start..content_end])
    })
}

fn element_text(xml: &str, name: &str) -> Option<String> {
    let text = decode_entities(element_content(xml, name)?.trim());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
pub(crate) fn sample_description(base_url: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0" xmlns:av="urn:schemas-sony-com:av">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:Basic:1</deviceType>
    <friendlyName>ILCE-6000</friendlyName>
    <manufacturer>Sony Corporation</manufacturer>
    <modelName>SonyImagingDevice</modelName>
    <av:X_ScalarWebAPI_DeviceInfo xmlns:av="urn:schemas-sony-com:av">
      <av:X_ScalarWebAPI_Version>1.0</av:X_ScalarWebAPI_Version>
      <av:X_ScalarWebAPI_ServiceList>
        <av:X_ScalarWebAPI_Service>
          <av:X_ScalarWebAPI_ServiceType>guide</av:X_ScalarWebAPI_ServiceType>
          <av:X_ScalarWebAPI_ActionList_URL>{base_url}/sony</av:X_ScalarWebAPI_ActionList_URL>
          <av:X_ScalarWebAPI_AccessType />
        </av:X_ScalarWebAPI_Service>
        <av:X_ScalarWebAPI_Service>
          <av:X_ScalarWebAPI_ServiceType>camera</av:X_ScalarWebAPI_ServiceType>
          <av:X_ScalarWebAPI_ActionList_URL>{base_url}/sony</av:X_ScalarWebAPI_ActionList_URL>
          <av:X_ScalarWebAPI_AccessType />
        </av:X_ScalarWebAPI_Service>
      </av:X_ScalarWebAPI_ServiceList>
    </av:X_ScalarWebAPI_DeviceInfo>
  </device>
</root>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_description() {
        let description =
            DeviceDescription::parse(&sample_description("http://192.168.122.1:8080")).unwrap();

        assert_eq!(description.friendly_name, "ILCE-6000");
        assert_eq!(description.manufacturer, "Sony Corporation");
        assert_eq!(
            description.services,
            vec![
                ServiceDescriptor::new("guide", "http://192.168.122.1:8080/sony/guide"),
                ServiceDescriptor::new("camera", "http://192.168.122.1:8080/sony/camera"),
            ]
        );

        let directory = description.directory();
        assert_eq!(directory.service_types(), vec!["guide", "camera"]);
    }

    #[test]
    fn test_parse_with_embedded_devices() {
        let xml = r#"<root><device>
            <friendlyName>ILCE-7M3</friendlyName>
            <deviceList>
              <device><friendlyName>Embedded</friendlyName></device>
            </deviceList>
            <X_ScalarWebAPI_Service>
              <X_ScalarWebAPI_ServiceType>camera</X_ScalarWebAPI_ServiceType>
              <X_ScalarWebAPI_ActionList_URL>http://10.0.0.1/sony</X_ScalarWebAPI_ActionList_URL>
            </X_ScalarWebAPI_Service>
          </device></root>"#;

        let description = DeviceDescription::parse(xml).unwrap();
        assert_eq!(description.friendly_name, "ILCE-7M3");
        assert_eq!(
            description.services,
            vec![ServiceDescriptor::new("camera", "http://10.0.0.1/sony/camera")]
        );
    }

    #[test]
    fn test_parse_without_namespace_prefix() {
        let xml = r#"<root><device>
            <friendlyName>DSC-QX10 &amp; friends</friendlyName>
            <X_ScalarWebAPI_Service>
              <X_ScalarWebAPI_ServiceType>camera</X_ScalarWebAPI_ServiceType>
              <X_ScalarWebAPI_ActionList_URL>http://10.0.0.1/sony/</X_ScalarWebAPI_ActionList_URL>
            </X_ScalarWebAPI_Service>
        </device></root>"#;

        let description = DeviceDescription::parse(xml).unwrap();
        assert_eq!(description.friendly_name, "DSC-QX10 & friends");
        assert_eq!(description.manufacturer, "");
        assert_eq!(description.services[0].base_url, "http://10.0.0.1/sony/camera");
    }

    #[test]
    fn test_parse_rejects_missing_services() {
        let xml = "<root><device><friendlyName>Printer</friendlyName></device></root>";
        assert!(matches!(
            DeviceDescription::parse(xml),
            Err(CameraError::DiscoveryFailed { .. })
        ));

        assert!(DeviceDescription::parse("not xml at all").is_err());
    }
}

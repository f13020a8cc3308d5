//! Marker popups and per-device colors.

use super::record::{DeviceId, DeviceRecord};

use chrono::{DateTime, Local};

/// Stable hue in `0..360` for a device identifier, so that a device keeps
/// its color across sessions and across clients.
///
/// This is the classic `h = c + (h << 5) - h` string hash over UTF-16 code
/// units, where the shift operates on the 32 bit truncation of `h` and the
/// rest of the arithmetic does not.
pub fn hue_for(id: &DeviceId) -> u16 {
    let hash = id.as_str().encode_utf16().fold(0i64, |acc, unit| {
        let shifted = ((acc as i32) << 5) as i64;
        (unit as i64).wrapping_add(shifted.wrapping_sub(acc))
    });
    (hash.unsigned_abs() % 360) as u16
}

/// Popup content for a device marker, rebuilt on every update.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: DeviceId,
    pub hue: u16,
    pub updated: DateTime<Local>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub satellites: u32,
}

impl Annotation {
    pub fn for_record(record: &DeviceRecord) -> Annotation {
        Annotation {
            id: record.id.clone(),
            hue: hue_for(&record.id),
            updated: record.last_update,
            latitude: record.latitude,
            longitude: record.longitude,
            altitude: record.altitude,
            satellites: record.satellite_count,
        }
    }

    /// CSS color of the marker, popup title and device button.
    pub fn color(&self) -> String {
        format!("hsl({}, 70%, 50%)", self.hue)
    }

    pub fn title(&self) -> String {
        format!("Device: {}", self.id)
    }

    pub fn lines(&self) -> Vec<String> {
        vec![
            self.title(),
            format!("Last update: {}", self.updated.format("%H:%M:%S")),
            format!("Lat: {:.6}", self.latitude),
            format!("Lng: {:.6}", self.longitude),
            format!("Alt: {:.2} m", self.altitude),
            format!("Satellites: {}", self.satellites),
        ]
    }

    pub fn to_html(&self) -> String {
        let mut lines = self.lines().into_iter();
        let mut html = format!(
            "<div style=\"min-width: 200px;\"><h4 style=\"margin: 0 0 5px 0; color: {}\">{}</h4>",
            self.color(),
            escape(&lines.next().unwrap_or_default())
        );
        for line in lines {
            match line.split_once(": ") {
                Some((key, value)) => html.push_str(&format!(
                    "<p><b>{}:</b> {}</p>",
                    escape(key),
                    escape(value)
                )),
                None => html.push_str(&format!("<p>{}</p>", escape(&line))),
            }
        }
        html.push_str("</div>");
        html
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hues() {
        assert_eq!(hue_for(&DeviceId::new("")), 0);
        assert_eq!(hue_for(&DeviceId::new("A")), 65);
        assert_eq!(hue_for(&DeviceId::new("AB")), 281);
        let mac = DeviceId::new("24:6F:28:AE:52:7C");
        assert_eq!(hue_for(&mac), hue_for(&mac.clone()));
        assert!(hue_for(&mac) < 360);
    }

    #[test]
    fn popup_contents() {
        let record = DeviceRecord {
            id: DeviceId::new("A"),
            latitude: 40.4167754,
            longitude: -3.7037902,
            altitude: 655.123,
            satellite_count: 9,
            present: true,
            last_update: Local.with_ymd_and_hms(2024, 5, 1, 13, 4, 5).unwrap(),
        };
        let annotation = Annotation::for_record(&record);
        assert_eq!(annotation.color(), "hsl(65, 70%, 50%)");
        assert_eq!(
            annotation.lines(),
            vec![
                "Device: A",
                "Last update: 13:04:05",
                "Lat: 40.416775",
                "Lng: -3.703790",
                "Alt: 655.12 m",
                "Satellites: 9",
            ]
        );
        let html = annotation.to_html();
        assert!(html.starts_with("<div"));
        assert!(html.contains("color: hsl(65, 70%, 50%)\">Device: A</h4>"));
        assert!(html.contains("<p><b>Alt:</b> 655.12 m</p>"));
    }

    #[test]
    fn html_is_escaped() {
        let record = DeviceRecord {
            id: DeviceId::new("<b>"),
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            satellite_count: 0,
            present: false,
            last_update: Local::now(),
        };
        assert!(Annotation::for_record(&record)
            .to_html()
            .contains("Device: &lt;b&gt;</h4>"));
    }
}

use crate::detector::Detection;
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Display name and annotation color for one model class.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorLabel {
    pub label: String,
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

/// A detection with its class label and color resolved, ready to draw.
#[derive(Debug, Clone)]
pub struct LabeledDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_label: String,
    pub red: u32,
    pub green: u32,
    pub blue: u32,
    pub confidence: f32,
}

/// The PPE class table, loaded once at startup from a `label,r,g,b` CSV.
#[derive(Debug, Clone)]
pub struct ClassLabels {
    labels: Vec<ColorLabel>,
}

impl ClassLabels {
    pub fn load(filepath: &Path) -> io::Result<Self> {
        let file = File::open(filepath)?;
        let reader = io::BufReader::new(file);
        let mut labels = Vec::new();

        for line_result in reader.lines() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() != 4 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid labels line: {}", line),
                ));
            }

            let label = parts[0].trim().to_string();
            let channel = |s: &str, name: &str| {
                s.trim().parse::<u32>().map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid {} value in labels line: {}", name, line),
                    )
                })
            };

            labels.push(ColorLabel {
                label,
                red: channel(parts[1], "red")?,
                green: channel(parts[2], "green")?,
                blue: channel(parts[3], "blue")?,
            });
        }

        if labels.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "labels file contains no classes",
            ));
        }

        Ok(Self { labels })
    }

    pub fn from_labels(labels: Vec<ColorLabel>) -> Self {
        Self { labels }
    }

    pub fn names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.label.clone()).collect()
    }

    pub fn resolve(&self, detection: &Detection) -> LabeledDetection {
        match self.labels.get(detection.class_id as usize) {
            Some(color_label) => LabeledDetection {
                x1: detection.x1,
                y1: detection.y1,
                x2: detection.x2,
                y2: detection.y2,
                class_label: color_label.label.clone(),
                red: color_label.red,
                green: color_label.green,
                blue: color_label.blue,
                confidence: detection.confidence,
            },
            None => LabeledDetection {
                x1: detection.x1,
                y1: detection.y1,
                x2: detection.x2,
                y2: detection.y2,
                class_label: format!("Unknown class {}", detection.class_id),
                red: 0,
                green: 0,
                blue: 0,
                confidence: detection.confidence,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_detection(class_id: u32) -> Detection {
        Detection {
            x1: 1.0,
            y1: 2.0,
            x2: 3.0,
            y2: 4.0,
            class_id,
            confidence: 0.8,
        }
    }

    #[test]
    fn loads_ppe_labels_csv() {
        let path = std::env::temp_dir().join(format!("ppe_labels_{}.csv", std::process::id()));
        let mut file = File::create(&path).unwrap();
        writeln!(file, "helmet, 0, 200, 0").unwrap();
        writeln!(file, "no-helmet, 220, 0, 0").unwrap();
        writeln!(file, "vest, 0, 160, 220").unwrap();
        writeln!(file, "no-vest, 230, 140, 0").unwrap();

        let labels = ClassLabels::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(
            labels.names(),
            vec!["helmet", "no-helmet", "vest", "no-vest"]
        );
        let resolved = labels.resolve(&sample_detection(1));
        assert_eq!(resolved.class_label, "no-helmet");
        assert_eq!((resolved.red, resolved.green, resolved.blue), (220, 0, 0));
    }

    #[test]
    fn rejects_malformed_labels_line() {
        let path = std::env::temp_dir().join(format!("ppe_labels_bad_{}.csv", std::process::id()));
        let mut file = File::create(&path).unwrap();
        writeln!(file, "helmet, 0, 200").unwrap();

        let result = ClassLabels::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }

    #[test]
    fn unknown_class_gets_placeholder_label() {
        let labels = ClassLabels::from_labels(vec![ColorLabel {
            label: "helmet".into(),
            red: 0,
            green: 200,
            blue: 0,
        }]);

        let resolved = labels.resolve(&sample_detection(9));

        assert_eq!(resolved.class_label, "Unknown class 9");
        assert_eq!((resolved.red, resolved.green, resolved.blue), (0, 0, 0));
    }
}

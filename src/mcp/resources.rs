//! Resource URIs and the resources/list catalogue.
//!
//! Three kinds of resource are exposed:
//!
//! - `excel://workbook`: workbook metadata as JSON
//! - `excel://worksheet/{name}`: the first rows of a worksheet as CSV
//! - `excel://worksheet/{name}/table/{table}`: the first rows of a table as CSV
//!
//! Name segments are percent-escaped, keeping only RFC 3986 unreserved
//! characters, so any worksheet or table name survives a round trip.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::mcp::types::ResourceDefinition;
use crate::workbook::WorkbookMetadata;

/// URI scheme of every resource.
pub const SCHEME: &str = "excel";

/// MIME type of the workbook resource.
pub const JSON_MIME_TYPE: &str = "application/json";

/// MIME type of worksheet and table resources.
pub const CSV_MIME_TYPE: &str = "text/csv";

/// A parsed resource URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    /// The whole workbook.
    Workbook,
    /// One worksheet.
    Worksheet {
        /// Worksheet name.
        name: String,
    },
    /// One table on a worksheet.
    Table {
        /// Worksheet name.
        worksheet: String,
        /// Table name.
        table: String,
    },
}

/// Why a resource URI was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceUriError {
    /// Not an `excel://` URI.
    #[error("Unsupported resource URI '{0}'.")]
    Unsupported(String),
    /// An `excel://` URI with an unknown shape.
    #[error("Malformed resource URI '{0}'.")]
    Malformed(String),
}

impl ResourceUri {
    /// Parses a resource URI. Scheme and host compare case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is not one of the supported shapes or a
    /// name segment is not valid percent-encoded UTF-8.
    pub fn parse(uri: &str) -> Result<Self, ResourceUriError> {
        let rest = uri
            .split_once("://")
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case(SCHEME))
            .map(|(_, rest)| rest)
            .ok_or_else(|| ResourceUriError::Unsupported(uri.to_string()))?;

        let malformed = || ResourceUriError::Malformed(uri.to_string());
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));

        if host.eq_ignore_ascii_case("workbook") {
            return if path.is_empty() {
                Ok(Self::Workbook)
            } else {
                Err(malformed())
            };
        }
        if !host.eq_ignore_ascii_case("worksheet") {
            return Err(ResourceUriError::Unsupported(uri.to_string()));
        }

        let segments: Vec<&str> = path.split('/').collect();
        match segments.as_slice() {
            [name] if !name.is_empty() => Ok(Self::Worksheet {
                name: decode(name).ok_or_else(malformed)?,
            }),
            [worksheet, kind, table]
                if !worksheet.is_empty() && kind.eq_ignore_ascii_case("table") && !table.is_empty() =>
            {
                Ok(Self::Table {
                    worksheet: decode(worksheet).ok_or_else(malformed)?,
                    table: decode(table).ok_or_else(malformed)?,
                })
            }
            _ => Err(malformed()),
        }
    }

    /// MIME type of this resource's body.
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Workbook => JSON_MIME_TYPE,
            Self::Worksheet { .. } | Self::Table { .. } => CSV_MIME_TYPE,
        }
    }
}

fn decode(segment: &str) -> Option<String> {
    urlencoding::decode(segment).ok().map(|s| s.into_owned())
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workbook => write!(f, "{SCHEME}://workbook"),
            Self::Worksheet { name } => {
                write!(f, "{SCHEME}://worksheet/{}", urlencoding::encode(name))
            }
            Self::Table { worksheet, table } => write!(
                f,
                "{SCHEME}://worksheet/{}/table/{}",
                urlencoding::encode(worksheet),
                urlencoding::encode(table)
            ),
        }
    }
}

impl FromStr for ResourceUri {
    type Err = ResourceUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Lists the workbook, each worksheet and each table as resources.
#[must_use]
pub fn list_resources(metadata: &WorkbookMetadata) -> Vec<ResourceDefinition> {
    let mut resources = vec![ResourceDefinition {
        uri: ResourceUri::Workbook.to_string(),
        name: "Workbook metadata".to_string(),
        description: Some(format!(
            "Worksheets, tables and column headers of {}",
            metadata.workbook_path
        )),
        mime_type: JSON_MIME_TYPE.to_string(),
    }];

    for worksheet in &metadata.worksheets {
        resources.push(ResourceDefinition {
            uri: ResourceUri::Worksheet {
                name: worksheet.name.clone(),
            }
            .to_string(),
            name: format!("Worksheet: {}", worksheet.name),
            description: Some(format!("First rows of worksheet '{}' as CSV", worksheet.name)),
            mime_type: CSV_MIME_TYPE.to_string(),
        });

        for table in &worksheet.tables {
            resources.push(ResourceDefinition {
                uri: ResourceUri::Table {
                    worksheet: worksheet.name.clone(),
                    table: table.name.clone(),
                }
                .to_string(),
                name: format!("Table: {}/{}", worksheet.name, table.name),
                description: Some(format!(
                    "First rows of table '{}' ({} rows) as CSV",
                    table.name, table.row_count
                )),
                mime_type: CSV_MIME_TYPE.to_string(),
            });
        }
    }

    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::model::{TableMetadata, WorksheetMetadata};
    use chrono::Utc;

    #[test]
    fn names_survive_round_trip() {
        for name in ["Sales", "Q1 Results", "Données/été", "a%b", "日本語", "x?y#z"] {
            let uri = ResourceUri::Worksheet {
                name: name.to_string(),
            };
            assert_eq!(ResourceUri::parse(&uri.to_string()).unwrap(), uri);

            let uri = ResourceUri::Table {
                worksheet: name.to_string(),
                table: format!("{name} table"),
            };
            assert_eq!(ResourceUri::parse(&uri.to_string()).unwrap(), uri);
        }
    }

    #[test]
    fn escaped_form() {
        let uri = ResourceUri::Table {
            worksheet: "Q1 Results".to_string(),
            table: "Orders".to_string(),
        };
        assert_eq!(uri.to_string(), "excel://worksheet/Q1%20Results/table/Orders");
        assert_eq!(ResourceUri::Workbook.to_string(), "excel://workbook");
    }

    #[test]
    fn scheme_and_host_are_case_insensitive() {
        assert_eq!(ResourceUri::parse("EXCEL://Workbook").unwrap(), ResourceUri::Workbook);
        assert_eq!(
            ResourceUri::parse("Excel://WORKSHEET/Data").unwrap(),
            ResourceUri::Worksheet {
                name: "Data".to_string()
            }
        );
    }

    #[test]
    fn rejects_other_uris() {
        assert!(matches!(
            ResourceUri::parse("file:///tmp/book.xlsx"),
            Err(ResourceUriError::Unsupported(_))
        ));
        assert!(matches!(
            ResourceUri::parse("excel://chart/1"),
            Err(ResourceUriError::Unsupported(_))
        ));
        assert!(matches!(
            ResourceUri::parse("excel://worksheet/"),
            Err(ResourceUriError::Malformed(_))
        ));
        assert!(matches!(
            ResourceUri::parse("excel://worksheet/A/pivot/B"),
            Err(ResourceUriError::Malformed(_))
        ));
        assert!(matches!(
            ResourceUri::parse("excel://worksheet/%FF"),
            Err(ResourceUriError::Malformed(_))
        ));
    }

    #[test]
    fn lists_workbook_worksheets_and_tables() {
        let metadata = WorkbookMetadata {
            workbook_path: "/data/book.xlsx".to_string(),
            worksheets: vec![WorksheetMetadata {
                name: "Sales Data".to_string(),
                tables: vec![TableMetadata {
                    name: "Orders".to_string(),
                    worksheet_name: "Sales Data".to_string(),
                    columns: vec!["Id".to_string()],
                    row_count: 3,
                }],
                column_headers: vec!["Id".to_string()],
            }],
            loaded_at: Utc::now(),
        };

        let resources = list_resources(&metadata);
        let uris: Vec<_> = resources.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "excel://workbook",
                "excel://worksheet/Sales%20Data",
                "excel://worksheet/Sales%20Data/table/Orders",
            ]
        );
        assert_eq!(resources[0].mime_type, "application/json");
        assert_eq!(resources[2].mime_type, "text/csv");
    }
}

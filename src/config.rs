use std::collections::{BTreeMap, HashMap};
use std::{env, fs, path::PathBuf};

use crate::prelude::*;
use crate::target::{Field, RecordLayout, Type, TypeRegistry};
use nestify::nest;
use serde::{Deserialize, Serialize};

nest! {
    #[derive(Debug, Default, Deserialize, Serialize)]*
    #[serde(rename_all = "kebab-case")]*
    /// Persistent configuration of the inspector.
    ///
    /// Stored at `~/.config/selva-inspect/config.yaml`. It describes the binary
    /// being inspected where its debug info falls short: extra or overridden
    /// record layouts, typedefs, and the types of global symbols.
    pub struct InspectConfig {
        #[serde(default)]
        pub layouts: pub struct LayoutConfig {
            #[serde(default)]
            pub records: Vec<RecordConfig>,
            /// Typedef name to C type name
            #[serde(default)]
            pub typedefs: BTreeMap<String, String>,
        },
        /// Symbol name to C type name
        #[serde(default)]
        pub symbols: BTreeMap<String, String>,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordConfig {
    pub name: String,
    pub size: u64,
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldConfig {
    pub name: String,
    pub offset: u64,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Path of the configuration file, following the XDG Base Directory
/// Specification.
///
/// If config_name is None, returns ~/.config/selva-inspect/config.yaml
/// If config_name is Some, returns ~/.config/selva-inspect/{config_name}.yaml
fn get_configuration_file_path(config_name: Option<&str>) -> Result<PathBuf> {
    let config_dir = match env::var("XDG_CONFIG_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let home = env::var("HOME").context("HOME env variable not set")?;
            PathBuf::from(home).join(".config")
        }
    };
    let config_dir = config_dir.join("selva-inspect");

    Ok(match config_name {
        Some(name) => config_dir.join(format!("{name}.yaml")),
        None => config_dir.join("config.yaml"),
    })
}

impl InspectConfig {
    /// Load the configuration. If it does not exist, return a default configuration.
    pub fn load(config_name: Option<&str>) -> Result<Self> {
        let config_path = get_configuration_file_path(config_name)?;

        match fs::read(&config_path) {
            Ok(config_str) => {
                let config: InspectConfig = serde_yaml::from_slice(&config_str).context(format!(
                    "Failed to parse selva-inspect config at {}",
                    config_path.display()
                ))?;
                debug!("Config loaded from {}", config_path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found at {}", config_path.display());
                Ok(InspectConfig::default())
            }
            Err(e) => bail!("Failed to load config: {e}"),
        }
    }

    /// `types` with the configured layouts applied on top.
    pub fn type_registry(&self, mut types: TypeRegistry) -> Result<TypeRegistry> {
        // Declare every record first so that layouts may refer to each other
        for record in &self.layouts.records {
            types.add_record(RecordLayout {
                name: record.name.clone(),
                size: record.size,
                fields: Vec::new(),
            });
        }
        for (name, type_name) in &self.layouts.typedefs {
            let ty = types
                .resolve(type_name)
                .with_context(|| format!("Invalid typedef {name}"))?;
            types.add_typedef(name, ty);
        }
        for record in &self.layouts.records {
            let fields = record
                .fields
                .iter()
                .map(|field| -> Result<Field> {
                    let ty = types.resolve(&field.type_name).with_context(|| {
                        format!("Invalid type of {}.{}", record.name, field.name)
                    })?;
                    if field.offset + types.size_of(&ty)? > record.size {
                        bail!(
                            "Field {}.{} does not fit in {} bytes",
                            record.name,
                            field.name,
                            record.size
                        );
                    }
                    Ok(Field::new(&field.name, field.offset, ty))
                })
                .collect::<Result<Vec<_>>>()?;
            types.add_record(RecordLayout {
                name: record.name.clone(),
                size: record.size,
                fields,
            });
            debug!("Configured layout of {}", record.name);
        }

        Ok(types)
    }

    pub fn symbol_types(&self, types: &TypeRegistry) -> Result<HashMap<String, Type>> {
        self.symbols
            .iter()
            .map(|(symbol, type_name)| -> Result<(String, Type)> {
                let ty = types
                    .resolve(type_name)
                    .with_context(|| format!("Invalid type of symbol {symbol}"))?;
                Ok((symbol.clone(), ty))
            })
            .collect()
    }
}

// ABOUTME: Image layer fragment: an ordered Dockerfile instruction list plus tag and build context.
// ABOUTME: Instruction order is significant, so each rendered line becomes its own field.

use super::{
    Fields, Healthcheck, ValidationError, check_key, parse_command, parse_name, split_pair,
};
use crate::types::{ImageRef, ResourceKind, ResourceName};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInstruction {
    From {
        image: String,
        alias: Option<String>,
    },
    Arg {
        name: String,
        default: Option<String>,
    },
    Env {
        key: String,
        value: String,
    },
    Label {
        key: String,
        value: String,
    },
    Workdir(String),
    Copy {
        src: String,
        dest: String,
        from: Option<String>,
    },
    Run(Vec<String>),
    Expose {
        port: u16,
        udp: bool,
    },
    User(String),
    Volume(String),
    Healthcheck(Healthcheck),
    Cmd(Vec<String>),
    Entrypoint(Vec<String>),
}

fn exec_form(args: &[String]) -> String {
    let quoted: Vec<String> = args
        .iter()
        .map(|a| serde_json::Value::String(a.clone()).to_string())
        .collect();
    format!("[{}]", quoted.join(", "))
}

fn quote_if_needed(value: &str) -> String {
    if value.is_empty() || value.contains(char::is_whitespace) || value.contains('"') {
        serde_json::Value::String(value.to_string()).to_string()
    } else {
        value.to_string()
    }
}

/// One Dockerfile line.
impl fmt::Display for ImageInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageInstruction::From { image, alias: None } => write!(f, "FROM {}", image),
            ImageInstruction::From {
                image,
                alias: Some(alias),
            } => write!(f, "FROM {} AS {}", image, alias),
            ImageInstruction::Arg {
                name,
                default: None,
            } => write!(f, "ARG {}", name),
            ImageInstruction::Arg {
                name,
                default: Some(default),
            } => write!(f, "ARG {}={}", name, quote_if_needed(default)),
            ImageInstruction::Env { key, value } => {
                write!(f, "ENV {}={}", key, quote_if_needed(value))
            }
            ImageInstruction::Label { key, value } => write!(
                f,
                "LABEL {}={}",
                key,
                serde_json::Value::String(value.clone())
            ),
            ImageInstruction::Workdir(dir) => write!(f, "WORKDIR {}", dir),
            ImageInstruction::Copy {
                src,
                dest,
                from: None,
            } => write!(f, "COPY {} {}", src, dest),
            ImageInstruction::Copy {
                src,
                dest,
                from: Some(stage),
            } => write!(f, "COPY --from={} {} {}", stage, src, dest),
            ImageInstruction::Run(commands) => write!(f, "RUN {}", commands.join(" && ")),
            ImageInstruction::Expose { port, udp: false } => write!(f, "EXPOSE {}", port),
            ImageInstruction::Expose { port, udp: true } => write!(f, "EXPOSE {}/udp", port),
            ImageInstruction::User(user) => write!(f, "USER {}", user),
            ImageInstruction::Volume(path) => write!(f, "VOLUME {}", exec_form(&[path.clone()])),
            ImageInstruction::Healthcheck(check) => write!(f, "HEALTHCHECK {}", check),
            ImageInstruction::Cmd(args) => write!(f, "CMD {}", exec_form(args)),
            ImageInstruction::Entrypoint(args) => write!(f, "ENTRYPOINT {}", exec_form(args)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayer {
    name: ResourceName,
    tag: ImageRef,
    context: String,
    instructions: Vec<ImageInstruction>,
}

impl ImageLayer {
    /// A single-stage layer starting `FROM base`, tagged `tag` once built.
    pub fn new(name: &str, tag: &str, base: &str) -> Result<Self, ValidationError> {
        Self::with_base(name, tag, base, None)
    }

    /// Like [`ImageLayer::new`], naming the first stage `alias`.
    pub fn with_base(
        name: &str,
        tag: &str,
        base: &str,
        alias: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let layer = Self {
            name: parse_name(name)?,
            tag: ImageRef::parse(tag).map_err(|e| ValidationError::invalid("tag", e.to_string()))?,
            context: ".".to_string(),
            instructions: Vec::new(),
        };
        layer.stage(base, alias)
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn tag_ref(&self) -> &ImageRef {
        &self.tag
    }

    pub fn build_context(&self) -> &str {
        &self.context
    }

    pub fn instructions(&self) -> &[ImageInstruction] {
        &self.instructions
    }

    fn with(&self, instruction: ImageInstruction) -> Self {
        let mut next = self.clone();
        next.instructions.push(instruction);
        next
    }

    fn stage_aliases(&self) -> impl Iterator<Item = &str> {
        self.instructions.iter().filter_map(|i| match i {
            ImageInstruction::From {
                alias: Some(alias), ..
            } => Some(alias.as_str()),
            _ => None,
        })
    }

    fn require(field: &'static str, value: &str) -> Result<String, ValidationError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ValidationError::invalid(field, "value cannot be empty"));
        }
        Ok(value.to_string())
    }

    /// Starts a new build stage. `alias` names it for later `copy_from`.
    pub fn stage(&self, base: &str, alias: Option<&str>) -> Result<Self, ValidationError> {
        let base = Self::require("from", base)?;
        let is_stage = self.stage_aliases().any(|a| a == base);
        if !is_stage && !base.contains('$') {
            ImageRef::parse(&base).map_err(|e| ValidationError::invalid("from", e.to_string()))?;
        }
        let alias = match alias {
            Some(alias) => {
                let alias = parse_name(alias)
                    .map_err(|e| ValidationError::invalid("from", e.to_string()))?
                    .to_string();
                if self.stage_aliases().any(|a| a == alias) {
                    return Err(ValidationError::conflict(
                        "from",
                        format!("stage '{}' is already declared", alias),
                    ));
                }
                Some(alias)
            }
            None => None,
        };
        Ok(self.with(ImageInstruction::From { image: base, alias }))
    }

    pub fn arg(&self, name: &str, default: Option<&str>) -> Result<Self, ValidationError> {
        check_key("arg", name)?;
        Ok(self.with(ImageInstruction::Arg {
            name: name.to_string(),
            default: default.map(str::to_string),
        }))
    }

    pub fn env(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        check_key("env", key)?;
        Ok(self.with(ImageInstruction::Env {
            key: key.to_string(),
            value: value.to_string(),
        }))
    }

    pub fn label(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        check_key("label", key)?;
        Ok(self.with(ImageInstruction::Label {
            key: key.to_string(),
            value: value.to_string(),
        }))
    }

    pub fn workdir(&self, dir: &str) -> Result<Self, ValidationError> {
        Ok(self.with(ImageInstruction::Workdir(Self::require("workdir", dir)?)))
    }

    pub fn copy(&self, src: &str, dest: &str) -> Result<Self, ValidationError> {
        Ok(self.with(ImageInstruction::Copy {
            src: Self::require("copy", src)?,
            dest: Self::require("copy", dest)?,
            from: None,
        }))
    }

    /// `COPY --from=stage`; the stage must have been declared earlier in this layer.
    pub fn copy_from(&self, stage: &str, src: &str, dest: &str) -> Result<Self, ValidationError> {
        if !self.stage_aliases().any(|a| a == stage) {
            return Err(ValidationError::invalid(
                "copy",
                format!("unknown build stage '{}'", stage),
            ));
        }
        Ok(self.with(ImageInstruction::Copy {
            src: Self::require("copy", src)?,
            dest: Self::require("copy", dest)?,
            from: Some(stage.to_string()),
        }))
    }

    pub fn run(&self, command: &str) -> Result<Self, ValidationError> {
        self.run_all(&[command])
    }

    /// Several commands chained with `&&` in a single layer.
    pub fn run_all<S: AsRef<str>>(&self, commands: &[S]) -> Result<Self, ValidationError> {
        let commands: Vec<String> = commands
            .iter()
            .map(|c| Self::require("run", c.as_ref()))
            .collect::<Result<_, _>>()?;
        if commands.is_empty() {
            return Err(ValidationError::invalid("run", "no commands given"));
        }
        Ok(self.with(ImageInstruction::Run(commands)))
    }

    pub fn expose(&self, port: u16) -> Result<Self, ValidationError> {
        if port == 0 {
            return Err(ValidationError::invalid("expose", "port cannot be 0"));
        }
        Ok(self.with(ImageInstruction::Expose { port, udp: false }))
    }

    pub fn expose_udp(&self, port: u16) -> Result<Self, ValidationError> {
        if port == 0 {
            return Err(ValidationError::invalid("expose", "port cannot be 0"));
        }
        Ok(self.with(ImageInstruction::Expose { port, udp: true }))
    }

    pub fn user(&self, user: &str) -> Result<Self, ValidationError> {
        Ok(self.with(ImageInstruction::User(Self::require("user", user)?)))
    }

    pub fn volume(&self, path: &str) -> Result<Self, ValidationError> {
        let path = Self::require("volume", path)?;
        if !path.starts_with('/') {
            return Err(ValidationError::invalid(
                "volume",
                format!("volume path must be absolute, got '{}'", path),
            ));
        }
        Ok(self.with(ImageInstruction::Volume(path)))
    }

    pub fn healthcheck(&self, check: Healthcheck) -> Result<Self, ValidationError> {
        check.validate()?;
        Ok(self.with(ImageInstruction::Healthcheck(check)))
    }

    pub fn cmd<S: AsRef<str>>(&self, args: &[S]) -> Result<Self, ValidationError> {
        if args.is_empty() {
            return Err(ValidationError::invalid("cmd", "command cannot be empty"));
        }
        Ok(self.with(ImageInstruction::Cmd(
            args.iter().map(|a| a.as_ref().to_string()).collect(),
        )))
    }

    pub fn entrypoint<S: AsRef<str>>(&self, args: &[S]) -> Result<Self, ValidationError> {
        if args.is_empty() {
            return Err(ValidationError::invalid(
                "entrypoint",
                "entrypoint cannot be empty",
            ));
        }
        Ok(self.with(ImageInstruction::Entrypoint(
            args.iter().map(|a| a.as_ref().to_string()).collect(),
        )))
    }

    /// Directory sent to the builder; relative paths resolve against the config file.
    pub fn context(&self, dir: &str) -> Result<Self, ValidationError> {
        let mut next = self.clone();
        next.context = Self::require("context", dir)?;
        Ok(next)
    }

    pub fn tag(&self, tag: &str) -> Result<Self, ValidationError> {
        let mut next = self.clone();
        next.tag = ImageRef::parse(tag).map_err(|e| ValidationError::invalid("tag", e.to_string()))?;
        Ok(next)
    }

    /// String form used by configuration files, e.g. `directive("copy", "--from=builder /out /srv")`.
    pub fn directive(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        match key {
            "from" => {
                let (base, alias) = split_from(value)?;
                self.stage(base, alias)
            }
            "arg" => match value.split_once('=') {
                Some((name, default)) => self.arg(name, Some(default)),
                None => self.arg(value, None),
            },
            "env" => {
                let (k, v) = split_pair("env", value)?;
                self.env(k, v)
            }
            "label" => {
                let (k, v) = split_pair("label", value)?;
                self.label(k, v)
            }
            "workdir" => self.workdir(value),
            "copy" => {
                let words: Vec<&str> = value.split_whitespace().collect();
                match words[..] {
                    [flag, src, dest] if flag.starts_with("--from=") => {
                        self.copy_from(&flag["--from=".len()..], src, dest)
                    }
                    [src, dest] => self.copy(src, dest),
                    _ => Err(ValidationError::invalid(
                        "copy",
                        format!("expected '[--from=stage] src dest', got '{}'", value),
                    )),
                }
            }
            "run" => self.run(value),
            "expose" => {
                let (port, udp) = match value.strip_suffix("/udp") {
                    Some(port) => (port, true),
                    None => (value.strip_suffix("/tcp").unwrap_or(value), false),
                };
                let port: u16 = port.trim().parse().map_err(|_| {
                    ValidationError::invalid("expose", format!("invalid port '{}'", value))
                })?;
                if udp {
                    self.expose_udp(port)
                } else {
                    self.expose(port)
                }
            }
            "user" => self.user(value),
            "volume" => self.volume(value),
            "healthcheck" => self.healthcheck(Healthcheck::new(value)?),
            "cmd" => self.cmd(&parse_command("cmd", value)?),
            "entrypoint" => self.entrypoint(&parse_command("entrypoint", value)?),
            "context" => self.context(value),
            "tag" => self.tag(value),
            other => Err(ValidationError::UnknownDirective {
                kind: ResourceKind::ImageLayer,
                key: other.to_string(),
            }),
        }
    }

    /// The full Dockerfile for this layer.
    pub fn dockerfile(&self) -> String {
        let mut out = String::new();
        for instruction in &self.instructions {
            out.push_str(&instruction.to_string());
            out.push('\n');
        }
        out
    }

    pub(super) fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("tag".into(), self.tag.to_string());
        fields.insert("context".into(), self.context.clone());
        for (i, instruction) in self.instructions.iter().enumerate() {
            fields.insert(format!("steps.{:03}", i), instruction.to_string());
        }
        fields
    }
}

/// Splits the `image [AS name]` form of a `FROM` line.
pub(crate) fn split_from(value: &str) -> Result<(&str, Option<&str>), ValidationError> {
    let words: Vec<&str> = value.split_whitespace().collect();
    match words[..] {
        [base] => Ok((base, None)),
        [base, as_kw, alias] if as_kw.eq_ignore_ascii_case("as") => Ok((base, Some(alias))),
        _ => Err(ValidationError::invalid(
            "from",
            format!("expected 'image [AS name]', got '{}'", value),
        )),
    }
}

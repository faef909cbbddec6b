use crate::table::{map_block, parse_block};
use crate::{
    ImageProperties, ImportRequest, RegisteredImage, RegistryClient, RegistryError, Selector,
};
use glancing_schema::{ImageId, MarketplaceId, Version};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info, trace};

/// Glance API version that still accepts a client-supplied checksum.
const CHECKSUM_API_ARGS: [&str; 2] = ["--os-image-api-version", "1"];

/// `RegistryClient` backed by the `glance` command-line client.
///
/// Authentication comes from the usual `OS_*` variables, which the child
/// process inherits untouched.
#[derive(Debug, Clone)]
pub struct GlanceCli {
    command: Vec<String>,
    site_params: Vec<String>,
    owner: Option<String>,
}

impl Default for GlanceCli {
    fn default() -> Self {
        Self::new(vec!["glance".to_owned()])
    }
}

impl GlanceCli {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            site_params: Vec::new(),
            owner: None,
        }
    }

    /// Build from the environment: `OS_PARAMS` holds site options such as
    /// `--insecure`, and `OS_TENANT_ID` or `OS_PROJECT_ID` scopes listings
    /// to one owner.
    pub fn from_env(command: Vec<String>) -> Self {
        let site_params = std::env::var("OS_PARAMS")
            .map(|p| p.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        let owner = ["OS_TENANT_ID", "OS_PROJECT_ID"]
            .iter()
            .find_map(|v| std::env::var(v).ok().filter(|s| !s.trim().is_empty()));
        Self::new(command)
            .with_site_params(site_params)
            .with_owner(owner)
    }

    #[must_use]
    pub fn with_site_params(mut self, params: Vec<String>) -> Self {
        self.site_params = params;
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    /// Full argument vector: program, site options, global options,
    /// subcommand and its arguments.
    pub fn argv(&self, global: &[&str], subcommand: &str, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.command.len() + global.len() + args.len() + 4);
        let mut program = self.command.iter();
        argv.extend(program.next().cloned());
        argv.extend(self.site_params.iter().cloned());
        argv.extend(program.cloned());
        argv.extend(global.iter().map(|s| (*s).to_owned()));
        argv.push(subcommand.to_owned());
        argv.extend(args.iter().map(|s| (*s).to_owned()));
        argv
    }

    fn run(&self, global: &[&str], subcommand: &str, args: &[&str]) -> Result<String, RegistryError> {
        let argv = self.argv(global, subcommand, args);
        let Some((program, rest)) = argv.split_first() else {
            return Err(RegistryError::Unavailable("empty glance command".to_owned()));
        };
        trace!("running {}", argv.join(" "));
        let output = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RegistryError::Unavailable(format!("cannot run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            debug!(
                "glance {subcommand} stdout: {}",
                String::from_utf8_lossy(&output.stdout).trim()
            );
            return Err(RegistryError::CommandFailed {
                command: argv.join(" "),
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn list(&self) -> Result<Vec<(ImageId, String)>, RegistryError> {
        let out = match &self.owner {
            Some(owner) => self.run(&[], "image-list", &["--owner", owner.as_str()])?,
            None => self.run(&[], "image-list", &[])?,
        };
        Ok(parse_image_rows(&out))
    }
}

/// Rows of `glance image-list`: the first two columns are id and name.
pub fn parse_image_rows(out: &str) -> Vec<(ImageId, String)> {
    parse_block(out)
        .rows
        .into_iter()
        .filter(|row| row.len() >= 2 && !row[0].is_empty())
        .map(|row| {
            let mut cells = row.into_iter();
            let id = cells.next().unwrap_or_default();
            let name = cells.next().unwrap_or_default();
            (ImageId::new(id), name)
        })
        .collect()
}

/// Custom properties show up bare with the v2 API and as
/// `Property 'key'` with v1.
fn property<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    map.get(key)
        .or_else(|| map.get(&format!("Property '{key}'")))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && *v != "None")
}

/// Parse `glance image-show` output.
pub fn parse_image_show(out: &str) -> Result<RegisteredImage, RegistryError> {
    let map = map_block(out);
    let id = property(&map, "id")
        .ok_or_else(|| RegistryError::Parse("image-show output has no id".to_owned()))?;
    Ok(RegisteredImage {
        id: ImageId::new(id),
        name: property(&map, "name").unwrap_or_default().to_owned(),
        checksum: property(&map, "checksum").map(str::to_ascii_lowercase),
        version: property(&map, "version").map(Version::new),
        mpid: property(&map, "mpid").map(MarketplaceId::new),
    })
}

impl RegistryClient for GlanceCli {
    fn available(&self) -> Result<(), RegistryError> {
        self.list().map(|images| {
            debug!("glance answers, {} image(s) visible", images.len());
        })
    }

    fn ids(&self, selector: &Selector) -> Result<BTreeSet<ImageId>, RegistryError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|(id, name)| selector.matches(id, name))
            .map(|(id, _)| id)
            .collect())
    }

    fn show(&self, id: &ImageId) -> Result<Option<RegisteredImage>, RegistryError> {
        match self.run(&[], "image-show", &[id.as_str()]) {
            Ok(out) => parse_image_show(&out).map(Some),
            Err(RegistryError::CommandFailed { stderr, .. })
                if stderr.to_lowercase().contains("no image") || stderr.contains("404") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn import_image(&self, request: &ImportRequest) -> Result<ImageId, RegistryError> {
        let file = request.file.to_string_lossy();
        let mut args = vec!["--container-format", "bare", "--file", &*file];
        if let Some(ref format) = request.disk_format {
            args.extend(["--disk-format", format.as_str()]);
        }
        if let Some(ref name) = request.name {
            args.extend(["--name", name.as_str()]);
        }
        let mut global: &[&str] = &[];
        if let Some(ref checksum) = request.checksum {
            args.extend(["--checksum", checksum.as_str()]);
            global = &CHECKSUM_API_ARGS;
        }
        info!(
            "importing {} as {}",
            request.file.display(),
            request.name.as_deref().unwrap_or("<unnamed>")
        );
        let out = self.run(global, "image-create", &args)?;
        map_block(&out)
            .remove("id")
            .filter(|id| !id.is_empty())
            .map(ImageId::new)
            .ok_or_else(|| RegistryError::Parse("image-create output has no id".to_owned()))
    }

    fn delete(&self, selector: &Selector) -> Result<(), RegistryError> {
        let id = self.resolve_id(selector)?;
        self.run(&[], "image-delete", &[id.as_str()]).map(drop)
    }

    fn rename(&self, selector: &Selector, new_name: &str) -> Result<(), RegistryError> {
        let id = self.resolve_id(selector)?;
        self.run(&[], "image-update", &["--name", new_name, id.as_str()])
            .map(drop)
    }

    fn update_properties(
        &self,
        selector: &Selector,
        properties: &ImageProperties,
    ) -> Result<(), RegistryError> {
        if properties.is_empty() {
            return Ok(());
        }
        let id = self.resolve_id(selector)?;
        let version = properties.version.as_ref().map(|v| format!("version={v}"));
        let mpid = properties.mpid.as_ref().map(|m| format!("mpid={m}"));

        let mut args: Vec<&str> = Vec::new();
        if let Some(ref name) = properties.name {
            args.extend(["--name", name.as_str()]);
        }
        for prop in [&version, &mpid].into_iter().flatten() {
            args.extend(["--property", prop.as_str()]);
        }
        args.push(id.as_str());
        self.run(&[], "image-update", &args).map(drop)
    }

    fn download(&self, selector: &Selector, path: &Path) -> Result<(), RegistryError> {
        let id = self.resolve_id(selector)?;
        let file = path.to_string_lossy();
        self.run(&[], "image-download", &["--file", &*file, id.as_str()])
            .map(drop)
    }
}

use std::fmt::{self, Display};
use std::str::FromStr;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// # Device
///
/// Placement token for arrays and managers. Whether a backend can honour a
/// device is decided when a tensor is first materialised there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    kind: DeviceKind,
    id: usize,
}

impl Device {
    pub fn cpu() -> Self {
        Self { kind: DeviceKind::Cpu, id: 0 }
    }

    /// The `id`th accelerator
    pub fn gpu(id: usize) -> Self {
        Self { kind: DeviceKind::Gpu, id }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_gpu(&self) -> bool {
        self.kind == DeviceKind::Gpu
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "cpu()"),
            DeviceKind::Gpu => write!(f, "gpu({})", self.id),
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    /// Accepts `cpu`, `gpu`, `gpu:N`, `cuda:N` and the display forms `cpu()` / `gpu(N)`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let invalid = || Error::InvalidArgument(format!("cannot parse device {:?}", s));
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => (kind.to_string(), Some(id.to_string())),
            None => match s.strip_suffix(')').and_then(|rest| rest.split_once('(')) {
                Some((kind, id)) if !id.is_empty() => (kind.to_string(), Some(id.to_string())),
                Some((kind, _)) => (kind.to_string(), None),
                None => (s.clone(), None),
            },
        };
        let id = match id {
            Some(id) => id.parse::<usize>().map_err(|_| invalid())?,
            None => 0,
        };
        match kind.as_str() {
            "cpu" if id == 0 => Ok(Device::cpu()),
            "gpu" | "cuda" => Ok(Device::gpu(id)),
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Device::cpu().to_string(), "cpu()");
        assert_eq!(Device::gpu(2).to_string(), "gpu(2)");
    }

    #[test]
    fn test_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::cpu());
        assert_eq!("gpu".parse::<Device>().unwrap(), Device::gpu(0));
        assert_eq!("gpu:1".parse::<Device>().unwrap(), Device::gpu(1));
        assert_eq!("CUDA:3".parse::<Device>().unwrap(), Device::gpu(3));
        assert_eq!("gpu(4)".parse::<Device>().unwrap(), Device::gpu(4));
        assert_eq!(Device::cpu().to_string().parse::<Device>().unwrap(), Device::cpu());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("tpu".parse::<Device>().is_err());
        assert!("gpu:x".parse::<Device>().is_err());
        assert!("cpu:1".parse::<Device>().is_err());
    }
}

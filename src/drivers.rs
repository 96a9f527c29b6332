//! Built-in peripheral drivers.

pub mod face;
pub mod lcd;
pub mod sound;
pub mod touch;

use std::{sync::Arc, time::Duration};

use log::info;

use crate::{config::ModulesConfig, module::HardwareModule, registry::ModuleFactory};

use face::FaceModule;
use lcd::LcdModule;
use sound::SoundModule;
use touch::TouchModule;

/// Factories for every enabled module, in discovery order.
///
/// Building a module never touches hardware; that happens in `init`.
pub fn builtin(config: &ModulesConfig, join_timeout: Duration) -> Vec<ModuleFactory> {
    let mut factories = Vec::new();

    if config.face.enabled {
        let cfg = config.face.clone();
        factories.push(ModuleFactory::new("face", move || {
            Ok(Arc::new(FaceModule::from_config(&cfg, join_timeout)) as Arc<dyn HardwareModule>)
        }));
    } else {
        info!("face module disabled in config");
    }

    if config.lcd.enabled {
        let cfg = config.lcd.clone();
        factories.push(ModuleFactory::new("lcd", move || {
            Ok(Arc::new(LcdModule::from_config(&cfg, join_timeout)) as Arc<dyn HardwareModule>)
        }));
    } else {
        info!("lcd module disabled in config");
    }

    if config.sound.enabled {
        let cfg = config.sound.clone();
        factories.push(ModuleFactory::new("sound", move || {
            Ok(Arc::new(SoundModule::from_config(&cfg, join_timeout)) as Arc<dyn HardwareModule>)
        }));
    } else {
        info!("sound module disabled in config");
    }

    if config.touch.enabled {
        let cfg = config.touch.clone();
        factories.push(ModuleFactory::new("touch", move || {
            Ok(Arc::new(TouchModule::from_config(&cfg, join_timeout)) as Arc<dyn HardwareModule>)
        }));
    } else {
        info!("touch module disabled in config");
    }

    factories
}

//! Action ids carried by menu buttons.
//!
//! Grammar: `edit:<field>`, `toggle:from_price`, `menu:targets:<platform>`,
//! `menu:main`, `broadcast:all`, `broadcast:all:<platform>`,
//! `broadcast:none`, `broadcast:target:<platform>:<id>`, `soon:<feature>`.

use std::{fmt, str::FromStr};

use crate::{broadcast::TargetSelector, domain::Platform, draft::DraftField, errors::Error};

/// Features shown in the menu that are not available yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upcoming {
    Site,
    Story,
}

impl Upcoming {
    pub fn as_str(self) -> &'static str {
        match self {
            Upcoming::Site => "site",
            Upcoming::Story => "story",
        }
    }

    pub fn notice(self) -> &'static str {
        match self {
            Upcoming::Site => "Em breve: integração com site (modo teste) 😄",
            Upcoming::Story => "Em breve: geração automática de Story (modo teste) 😄",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Edit(DraftField),
    ToggleFromPrice,
    OpenTargets(Platform),
    MainMenu,
    Broadcast(TargetSelector),
    ComingSoon(Upcoming),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Edit(field) => write!(f, "edit:{field}"),
            Action::ToggleFromPrice => f.write_str("toggle:from_price"),
            Action::OpenTargets(p) => write!(f, "menu:targets:{p}"),
            Action::MainMenu => f.write_str("menu:main"),
            Action::Broadcast(TargetSelector::All) => f.write_str("broadcast:all"),
            Action::Broadcast(TargetSelector::Platform(p)) => write!(f, "broadcast:all:{p}"),
            Action::Broadcast(TargetSelector::NoneRegistered) => f.write_str("broadcast:none"),
            Action::Broadcast(TargetSelector::Single(key)) => write!(f, "broadcast:target:{key}"),
            Action::ComingSoon(u) => write!(f, "soon:{}", u.as_str()),
        }
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || Error::UnknownAction(s.to_string());

        let (head, rest) = s.split_once(':').ok_or_else(unknown)?;
        let action = match (head, rest) {
            ("edit", field) => Action::Edit(field.parse().map_err(|_| unknown())?),
            ("toggle", "from_price") => Action::ToggleFromPrice,
            ("menu", "main") => Action::MainMenu,
            ("menu", rest) => {
                let platform = rest.strip_prefix("targets:").ok_or_else(unknown)?;
                Action::OpenTargets(platform.parse().map_err(|_| unknown())?)
            }
            ("broadcast", "all") => Action::Broadcast(TargetSelector::All),
            ("broadcast", "none") => Action::Broadcast(TargetSelector::NoneRegistered),
            ("broadcast", rest) => {
                if let Some(platform) = rest.strip_prefix("all:") {
                    Action::Broadcast(TargetSelector::Platform(
                        platform.parse().map_err(|_| unknown())?,
                    ))
                } else if let Some(key) = rest.strip_prefix("target:") {
                    Action::Broadcast(TargetSelector::Single(key.parse().map_err(|_| unknown())?))
                } else {
                    return Err(unknown());
                }
            }
            ("soon", "site") => Action::ComingSoon(Upcoming::Site),
            ("soon", "story") => Action::ComingSoon(Upcoming::Story),
            _ => return Err(unknown()),
        };
        Ok(action)
    }
}

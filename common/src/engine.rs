use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::{
    color::CctRange,
    config::PersistedSettings,
    error::{ClockSyncError, ParseError},
    guard::{PushMode, PushTicket, UpdateGuard},
    protocol::{
        parse_frame, ClockField, ClockSet, Command, Field, Response, Setting,
        PROTOCOL_VERSION_SUB,
    },
    schedule::{schedule_for, CycleReview},
    types::SolarPoint,
};

/// Side effects the host performs for the engine, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    Persist(PersistedSettings),
    Push(PushTicket),
    SetClock(NaiveDateTime),
    /// Recompute the schedule for the (possibly corrected) host clock and
    /// push it, see [`PerfektDayEngine::refresh`].
    Refresh,
    CancelReview,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ready(Response),
    /// Answer with the host clock as read after all actions ran.
    ReadBack(Field),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub reply: Reply,
    pub actions: Vec<EngineAction>,
}

impl CommandOutcome {
    fn ready(response: Response) -> Self {
        Self {
            reply: Reply::Ready(response),
            actions: Vec::new(),
        }
    }
}

/// Runtime-only state. Nothing here is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    #[serde(rename = "perfektDayEnabled")]
    pub perfekt_day_enabled: bool,
    #[serde(rename = "perfektLight")]
    pub perfekt_light: bool,
    #[serde(rename = "cctNow")]
    pub cct_now: u8,
    #[serde(rename = "dimNow")]
    pub dim_now: u8,
    #[serde(rename = "clientConnected")]
    pub client_connected: bool,
    #[serde(rename = "reviewActive")]
    pub review_active: bool,
}

#[derive(Debug, Clone)]
pub struct PerfektDayEngine {
    settings: PersistedSettings,
    session: SessionState,
    guard: UpdateGuard,
}

impl PerfektDayEngine {
    /// Automatic mode always starts enabled, whatever the previous run left.
    pub fn new(mut settings: PersistedSettings, perfekt_light: bool) -> Self {
        settings.sanitize();
        Self {
            settings,
            session: SessionState {
                perfekt_day_enabled: true,
                perfekt_light,
                cct_now: 0,
                dim_now: u8::MAX,
                client_connected: false,
                review_active: false,
            },
            guard: UpdateGuard::new(),
        }
    }

    pub fn settings(&self) -> &PersistedSettings {
        &self.settings
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn guard(&self) -> &UpdateGuard {
        &self.guard
    }

    pub fn cct_range(&self) -> CctRange {
        CctRange::from_settings(&self.settings)
    }

    pub fn is_perfekt_day(&self) -> bool {
        self.session.perfekt_day_enabled
    }

    pub fn set_client_connected(&mut self, connected: bool) {
        self.session.client_connected = connected;
    }

    pub fn handle_frame(&mut self, raw: &str, now: &NaiveDateTime) -> CommandOutcome {
        match parse_frame(raw) {
            Ok(command) => self.handle_command(command, now),
            Err(_) => CommandOutcome::ready(Response::Error),
        }
    }

    pub fn handle_command(&mut self, command: Command, now: &NaiveDateTime) -> CommandOutcome {
        match command {
            Command::Query(field) => CommandOutcome::ready(self.query(field, now)),
            Command::Set(setting) => match self.apply(setting) {
                Ok(actions) => CommandOutcome {
                    reply: Reply::Ready(self.query(setting.field(), now)),
                    actions,
                },
                Err(_) => CommandOutcome::ready(Response::Error),
            },
            Command::SyncClock(set) => self.sync_clock(set, now),
        }
    }

    fn query(&self, field: Field, now: &NaiveDateTime) -> Response {
        let s = &self.settings;
        match field {
            Field::Version => Response::new(field, format!("Version 0.{PROTOCOL_VERSION_SUB}")),
            Field::PerfektDay => Response::new(field, u8::from(self.session.perfekt_day_enabled)),
            Field::PerfektLight => Response::new(field, u8::from(self.session.perfekt_light)),
            Field::SunUp => Response::new(field, s.sun_up),
            Field::SolarNoon => Response::new(field, s.solar_noon),
            Field::SunDown => Response::new(field, s.sun_down),
            Field::SunUpDim => Response::new(field, s.sun_up_dim),
            Field::SolarNoonDim => Response::new(field, s.solar_noon_dim),
            Field::SunDownDim => Response::new(field, s.sun_down_dim),
            Field::CctLimitTop => Response::new(field, s.cct_limit_top),
            Field::CctLimitBottom => Response::new(field, s.cct_limit_bottom),
            Field::NightCct => Response::new(field, s.night_cct),
            Field::ColorTemp => Response::new(field, self.session.cct_now),
            Field::DimLevel => Response::new(field, self.session.dim_now),
            Field::Time | Field::Date | Field::Year => clock_reply(field, now),
        }
    }

    fn apply(&mut self, setting: Setting) -> Result<Vec<EngineAction>, ParseError> {
        let s = &mut self.settings;
        match setting {
            Setting::SunUp(time) => s.sun_up = time,
            Setting::SolarNoon(time) => s.solar_noon = time,
            Setting::SunDown(time) => s.sun_down = time,
            Setting::SunUpDim(dim) => s.sun_up_dim = dim,
            Setting::SolarNoonDim(dim) => s.solar_noon_dim = dim,
            Setting::SunDownDim(dim) => s.sun_down_dim = dim,
            Setting::NightCct(code) => s.night_cct = code,
            Setting::CctLimitTop(kelvin) => {
                if kelvin <= s.cct_limit_bottom {
                    return Err(invalid_limit(Field::CctLimitTop, kelvin));
                }
                s.cct_limit_top = kelvin;
            }
            Setting::CctLimitBottom(kelvin) => {
                if kelvin == 0 || kelvin >= s.cct_limit_top {
                    return Err(invalid_limit(Field::CctLimitBottom, kelvin));
                }
                s.cct_limit_bottom = kelvin;
            }
            Setting::PerfektDay(enabled) => {
                let mut actions = self.cancel_review();
                self.session.perfekt_day_enabled = enabled;
                if enabled {
                    actions.push(EngineAction::Refresh);
                }
                return Ok(actions);
            }
            Setting::ColorTemp(code) => {
                self.session.cct_now = code;
                return Ok(self.manual_override());
            }
            Setting::DimLevel(dim) => {
                self.session.dim_now = dim;
                return Ok(self.manual_override());
            }
        }

        Ok(vec![EngineAction::Persist(self.settings.clone())])
    }

    fn manual_override(&mut self) -> Vec<EngineAction> {
        let mut actions = self.cancel_review();
        self.session.perfekt_day_enabled = false;
        let target = self.current_point();
        actions.extend(self.request_push(target, PushMode::Always));
        actions
    }

    fn cancel_review(&mut self) -> Vec<EngineAction> {
        if self.session.review_active {
            self.session.review_active = false;
            vec![EngineAction::CancelReview]
        } else {
            Vec::new()
        }
    }

    fn sync_clock(&mut self, set: ClockSet, now: &NaiveDateTime) -> CommandOutcome {
        let reply_field = match set.field() {
            ClockField::Time => Field::Time,
            // The year is confirmed with the date.
            ClockField::Date | ClockField::Year => Field::Date,
        };

        match clock_target(set, now) {
            Ok(target) => {
                let mut actions = vec![EngineAction::SetClock(target)];
                if set.field() == ClockField::Time && self.session.perfekt_day_enabled {
                    actions.push(EngineAction::Refresh);
                }
                CommandOutcome {
                    reply: Reply::ReadBack(reply_field),
                    actions,
                }
            }
            Err(_) => CommandOutcome::ready(clock_reply(reply_field, now)),
        }
    }

    fn current_point(&self) -> SolarPoint {
        SolarPoint {
            cct: self.session.cct_now,
            dim: self.session.dim_now,
        }
    }

    fn request_push(&mut self, target: SolarPoint, mode: PushMode) -> Option<EngineAction> {
        self.guard.request(target, mode).map(EngineAction::Push)
    }

    fn follow_schedule(&mut self, minutes: u16, mode: PushMode) -> Vec<EngineAction> {
        let point = schedule_for(minutes, &self.settings);
        self.session.cct_now = point.cct;
        self.session.dim_now = point.dim;
        self.request_push(point, mode).into_iter().collect()
    }

    /// Scheduler tick. Does nothing while automatic mode is off.
    pub fn tick(&mut self, minutes: u16) -> Vec<EngineAction> {
        if !self.session.perfekt_day_enabled {
            return Vec::new();
        }
        self.follow_schedule(minutes, PushMode::IfChanged)
    }

    /// Out-of-cycle recompute, written even if unchanged.
    pub fn refresh(&mut self, minutes: u16) -> Vec<EngineAction> {
        if !self.session.perfekt_day_enabled {
            return Vec::new();
        }
        self.follow_schedule(minutes, PushMode::Always)
    }

    /// Hands automatic mode over to a cycle review and returns its cursor.
    pub fn begin_review(&mut self, margin_minutes: u16, step_minutes: u16) -> CycleReview {
        self.session.perfekt_day_enabled = false;
        self.session.review_active = true;
        CycleReview::new(&self.settings, margin_minutes, step_minutes)
    }

    /// One step of the sweep. Returns `None` once the review has been
    /// cancelled, so the driver can stop.
    pub fn review_step(&mut self, minutes: u16) -> Option<Vec<EngineAction>> {
        if !self.session.review_active {
            return None;
        }
        Some(self.follow_schedule(minutes, PushMode::Always))
    }

    /// Ends a review that ran to completion and re-enables automatic mode.
    /// Returns false if it had already been cancelled.
    pub fn finish_review(&mut self) -> bool {
        if !self.session.review_active {
            return false;
        }
        self.session.review_active = false;
        self.session.perfekt_day_enabled = true;
        true
    }

    /// Aborts a review without touching automatic mode.
    pub fn abort_review(&mut self) -> bool {
        !self.cancel_review().is_empty()
    }

    /// Returns the parked follow-up push, if any.
    pub fn complete_push(&mut self, ticket: PushTicket) -> Option<PushTicket> {
        self.guard.complete(ticket)
    }

    /// Refreshes the guard from the group's reported `ct` (mired) and `bri`.
    /// Several codes share one mired value, so a reading that matches the
    /// last pushed code in mired keeps that code.
    pub fn reconcile(&mut self, mired: Option<u16>, bri: Option<u8>) {
        let range = self.cct_range();
        let (last_cct, _) = self.guard.last_pushed();
        let remote_cct = mired.map(|mired| match last_cct {
            Some(code) if range.code_to_mired(code) == mired => code,
            _ => range.mired_to_code(mired),
        });
        self.guard.reconcile(remote_cct, bri);
    }
}

fn invalid_limit(field: Field, kelvin: u16) -> ParseError {
    ParseError::InvalidArgument {
        code: field.code(),
        value: kelvin.to_string(),
    }
}

/// Combines the supplied component with the rest of `now`.
pub fn clock_target(set: ClockSet, now: &NaiveDateTime) -> Result<NaiveDateTime, ClockSyncError> {
    match set {
        ClockSet::Time { hour, minute } => {
            if hour > 23 {
                return Err(ClockSyncError::OutOfRange {
                    field: "hour",
                    value: hour,
                });
            }
            if minute > 59 {
                return Err(ClockSyncError::OutOfRange {
                    field: "minute",
                    value: minute,
                });
            }
            now.date()
                .and_hms_opt(hour, minute, now.second())
                .ok_or(ClockSyncError::OutOfRange {
                    field: "second",
                    value: now.second(),
                })
        }
        ClockSet::Date { month, day } => {
            if !(1..=12).contains(&month) {
                return Err(ClockSyncError::OutOfRange {
                    field: "month",
                    value: month,
                });
            }
            let date = calendar_date(now.year(), month, day)?;
            Ok(date.and_time(now.time()))
        }
        ClockSet::Year(yy) => {
            if yy > 99 {
                return Err(ClockSyncError::OutOfRange {
                    field: "year",
                    value: yy,
                });
            }
            let date = calendar_date(2000 + yy as i32, now.month(), now.day())?;
            Ok(date.and_time(now.time()))
        }
    }
}

fn calendar_date(year: i32, month: u32, day: u32) -> Result<NaiveDate, ClockSyncError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or(ClockSyncError::InvalidDate { year, month, day })
}

/// Formats a clock field the way its query answers.
pub fn clock_reply(field: Field, now: &NaiveDateTime) -> Response {
    let pattern = match field {
        Field::Time => "%H:%M",
        Field::Year => "%y",
        _ => "%m/%d",
    };
    Response::new(field, now.format(pattern))
}

/// Argument for `date --set`.
pub fn clock_set_argument(target: &NaiveDateTime) -> String {
    target.format("%Y%m%d %H:%M:%S").to_string()
}

//! Cron 调度计算
//!
//! 对外接受标准 5 段表达式（分 时 日 月 周），内部补上秒位交给 `cron` crate 解析。
//! 标准写法里星期取 0-7（0 与 7 都是周日，1 是周一），`cron` crate 取 1-7（1 是周日），
//! 数字星期在这里换算；MON-FRI 这类名称两边一致，原样透传。
//! 6/7 段表达式按 `cron` crate 自身的语义原样透传。

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::core::ModuleError;

/// 已解析的 Cron 表达式
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ModuleError> {
        let invalid = |message: String| ModuleError::InvalidCron {
            expr: expr.to_string(),
            message,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let weekdays = translate_weekdays(fields[4]).map_err(invalid)?;
                format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], weekdays)
            }
            6 | 7 => fields.join(" "),
            n => return Err(invalid(format!("expected 5 fields, got {n}"))),
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;
        Ok(Self { schedule })
    }

    /// 严格晚于 `from` 的下一个触发点
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 从 `from` 起的若干个触发点（详情视图展示用）
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }
}

/// 把标准星期字段换算为 `cron` crate 的编号
///
/// 数字项（单值、区间、步长）展开为显式列表；名称项原样保留。
fn translate_weekdays(field: &str) -> Result<String, String> {
    let mut days = BTreeSet::new();
    let mut named = Vec::new();

    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{step}'"))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (base, Some(step))
            }
            None => (item, None),
        };

        let bounds = match base {
            "*" | "?" => step.map(|_| (0, 6)),
            _ => match base.split_once('-') {
                Some((lo, hi)) => match (weekday_number(lo)?, weekday_number(hi)?) {
                    (Some(lo), Some(hi)) => Some((lo, hi)),
                    _ => None,
                },
                None => weekday_number(base)?.map(|d| (d, if step.is_some() { 6 } else { d })),
            },
        };

        let Some((lo, hi)) = bounds else {
            named.push(item.to_string());
            continue;
        };
        if lo > hi {
            return Err(format!("invalid day-of-week range '{base}'"));
        }
        days.extend((lo..=hi).step_by(step.unwrap_or(1)).map(|d| d % 7 + 1));
    }

    let mut items: Vec<String> = days.iter().map(u32::to_string).collect();
    items.extend(named);
    Ok(items.join(","))
}

/// 数字星期返回 Some，名称返回 None
fn weekday_number(token: &str) -> Result<Option<u32>, String> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    match token.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(Some(day)),
        _ => Err(format!("day of week '{token}' out of range 0-7")),
    }
}

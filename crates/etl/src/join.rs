//! 日表按日期对齐与左连接

use crate::types::{ColumnValues, DailyTable, ETLError, ETLResult, JoinedTable};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

/// 表连接器
///
/// 以第一个表（访客/会话表）为种子做左连接链：输出行集合恰好是种子表的日期集合，
/// 非种子表缺失的值保持缺失，不在这一步填补。
pub struct TableJoiner {
    date_key: String,
}

impl TableJoiner {
    pub fn new(date_key: impl Into<String>) -> Self {
        Self {
            date_key: date_key.into(),
        }
    }

    pub fn date_key(&self) -> &str {
        &self.date_key
    }

    /// 执行左连接
    pub fn join(&self, seed: &DailyTable, others: &[DailyTable]) -> ETLResult<JoinedTable> {
        tracing::info!(
            "Joining seed table {} with {} tables on `{}`",
            seed.name,
            others.len(),
            self.date_key
        );

        let seed_dates = self.unique_dates(seed)?;

        // 种子表按日期排序
        let mut order: Vec<usize> = (0..seed_dates.len()).collect();
        order.sort_by_key(|&i| seed_dates[i]);
        let dates: Vec<NaiveDate> = order.iter().map(|&i| seed_dates[i]).collect();

        let mut columns: Vec<(String, Vec<Option<f64>>)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for column in &seed.columns {
            if column.name == self.date_key {
                continue;
            }
            let values = match &column.values {
                ColumnValues::Numeric(v) => v,
                ColumnValues::Date(_) => continue,
            };
            seen.insert(column.name.clone());
            columns.push((
                column.name.clone(),
                order.iter().map(|&i| values[i]).collect(),
            ));
        }

        for table in others {
            let table_dates = self.unique_dates(table)?;
            let index: HashMap<NaiveDate, usize> = table_dates
                .iter()
                .enumerate()
                .map(|(i, d)| (*d, i))
                .collect();

            let mut matched = 0usize;
            let rows: Vec<Option<usize>> = dates
                .iter()
                .map(|d| {
                    let hit = index.get(d).copied();
                    if hit.is_some() {
                        matched += 1;
                    }
                    hit
                })
                .collect();

            for column in &table.columns {
                if column.name == self.date_key {
                    continue;
                }
                let values = match &column.values {
                    ColumnValues::Numeric(v) => v,
                    ColumnValues::Date(_) => continue,
                };
                if !seen.insert(column.name.clone()) {
                    return Err(ETLError::schema(
                        &table.name,
                        format!("列 `{}` 与已连接的列重名", column.name),
                    ));
                }
                columns.push((
                    column.name.clone(),
                    rows.iter().map(|r| r.and_then(|i| values[i])).collect(),
                ));
            }

            tracing::info!(
                "Joined {}: matched {}/{} seed dates",
                table.name,
                matched,
                dates.len()
            );
        }

        Ok(JoinedTable { dates, columns })
    }

    /// 校验日期列存在且唯一
    fn unique_dates<'a>(&self, table: &'a DailyTable) -> ETLResult<&'a [NaiveDate]> {
        let dates = table.date_column(&self.date_key)?;
        let mut seen = HashSet::with_capacity(dates.len());
        for d in dates {
            if !seen.insert(*d) {
                return Err(ETLError::schema(
                    &table.name,
                    format!("日期 {} 重复，预聚合后每个日期只能有一行", d),
                ));
            }
        }
        Ok(dates)
    }
}

impl Default for TableJoiner {
    fn default() -> Self {
        Self::new("date")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn visitors() -> DailyTable {
        DailyTable::new(
            "visitors",
            vec![
                Column::date("date", vec![d(3), d(1), d(2)]),
                Column::numeric("user_count", vec![Some(30.0), Some(10.0), Some(20.0)]),
                Column::numeric("session_count", vec![Some(33.0), Some(11.0), Some(22.0)]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_left_join_keeps_seed_dates() {
        let ppc = DailyTable::new(
            "ppc",
            vec![
                Column::date("date", vec![d(1), d(3), d(9)]),
                Column::numeric("total_ppc_spend", vec![Some(5.0), Some(7.0), Some(100.0)]),
            ],
        )
        .unwrap();

        let joined = TableJoiner::default().join(&visitors(), &[ppc]).unwrap();

        assert_eq!(joined.dates, vec![d(1), d(2), d(3)]);
        assert_eq!(
            joined.column("user_count").unwrap(),
            &[Some(10.0), Some(20.0), Some(30.0)]
        );
        // 2 日在广告表中不存在，保持缺失
        assert_eq!(
            joined.column("total_ppc_spend").unwrap(),
            &[Some(5.0), None, Some(7.0)]
        );
    }

    #[test]
    fn test_duplicate_date_is_schema_error() {
        let occupancy = DailyTable::new(
            "occupancy",
            vec![
                Column::date("date", vec![d(1), d(1)]),
                Column::numeric("fill_rate", vec![Some(0.5), Some(0.6)]),
            ],
        )
        .unwrap();

        let err = TableJoiner::default()
            .join(&visitors(), &[occupancy])
            .unwrap_err();
        assert!(matches!(err, ETLError::Schema { ref table, .. } if table == "occupancy"));
    }

    #[test]
    fn test_missing_date_column_is_schema_error() {
        let ppc = DailyTable::new(
            "ppc",
            vec![
                Column::date("day", vec![d(1)]),
                Column::numeric("total_ppc_spend", vec![Some(5.0)]),
            ],
        )
        .unwrap();

        let err = TableJoiner::default().join(&visitors(), &[ppc]).unwrap_err();
        assert!(matches!(err, ETLError::Schema { .. }));
    }

    #[test]
    fn test_column_name_clash_rejected() {
        let other = DailyTable::new(
            "website",
            vec![
                Column::date("date", vec![d(1)]),
                Column::numeric("user_count", vec![Some(1.0)]),
            ],
        )
        .unwrap();

        assert!(TableJoiner::default().join(&visitors(), &[other]).is_err());
    }
}

use crate::tasks::TaskManager;
use crate::tasks::task::TaskStatus;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

impl TaskManager {
    /// 可达性检查：从 `deps` 沿已提交的依赖边能否回到 `id`。
    ///
    /// 返回形如 `[id, dep, ..., id]` 的环路径。`id` 自身已提交的旧边不参与遍历，
    /// 因此同样适用于 `resubmit`。
    pub(crate) fn find_cycle(&self, id: &str, deps: &BTreeSet<String>) -> Option<Vec<String>> {
        let mut visited: HashSet<String> = HashSet::new();
        for dep in deps {
            let mut path = vec![id.to_string()];
            if self.reaches(dep, id, &mut visited, &mut path) {
                return Some(path);
            }
        }
        None
    }

    fn reaches(
        &self,
        current: &str,
        target: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        path.push(current.to_string());
        if current == target {
            return true;
        }
        if visited.insert(current.to_string())
            && let Some(task) = self.tasks.get(current)
        {
            for dep in &task.dependencies {
                if self.reaches(dep, target, visited, path) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    /// 拓扑排序（Kahn 算法），同层按提交顺序排列。未提交的依赖被忽略。
    pub fn topological_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut adj_list: HashMap<&str, Vec<&str>> = HashMap::new();

        for id in &self.order {
            in_degree.insert(id, 0);
        }
        for id in &self.order {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };
            for dep in &task.dependencies {
                if self.tasks.contains_key(dep) {
                    adj_list.entry(dep.as_str()).or_default().push(id);
                    if let Some(degree) = in_degree.get_mut(id.as_str()) {
                        *degree += 1;
                    }
                }
            }
        }

        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut result = Vec::with_capacity(self.order.len());

        while let Some(id) = queue.pop_front() {
            result.push(id.to_string());
            if let Some(next) = adj_list.get(id) {
                for neighbor in next {
                    if let Some(degree) = in_degree.get_mut(neighbor) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*neighbor);
                        }
                    }
                }
            }
        }

        result
    }

    /// 生成依赖图的可视化（Mermaid 格式）
    pub fn visualize_dependencies(&self) -> String {
        let mut mermaid = String::from("graph TD\n");

        for task in self.tasks() {
            if task.dependencies.is_empty() {
                mermaid.push_str(&format!("  {}[{}]\n", task.id, task.id));
            }
            for dep_id in &task.dependencies {
                mermaid.push_str(&format!(
                    "  {}[{}] --> {}[{}]\n",
                    dep_id, dep_id, task.id, task.id
                ));
            }
        }

        mermaid
    }

    /// 获取依赖链（从指定任务到根节点）
    pub fn dependency_chains(&self, task_id: &str) -> Vec<Vec<String>> {
        let mut chains = Vec::new();
        let mut current_chain = Vec::new();
        self.dependency_chain_recursive(task_id, &mut current_chain, &mut chains);
        chains
    }

    fn dependency_chain_recursive(
        &self,
        task_id: &str,
        current_chain: &mut Vec<String>,
        chains: &mut Vec<Vec<String>>,
    ) {
        current_chain.push(task_id.to_string());

        match self.tasks.get(task_id) {
            Some(task) if !task.dependencies.is_empty() => {
                for dep_id in &task.dependencies {
                    self.dependency_chain_recursive(dep_id, current_chain, chains);
                }
            }
            _ => chains.push(current_chain.clone()),
        }

        current_chain.pop();
    }

    /// 找出阻塞该任务的所有失败祖先
    pub fn blocked_by(&self, task_id: &str) -> Vec<String> {
        let mut failed = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![task_id];

        while let Some(id) = stack.pop() {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };
            for dep in task.dependencies.iter().rev() {
                if !seen.insert(dep.as_str()) {
                    continue;
                }
                if let Some(dep_task) = self.tasks.get(dep)
                    && matches!(dep_task.status, TaskStatus::Failed(_))
                {
                    failed.push(dep.clone());
                }
                stack.push(dep);
            }
        }

        failed
    }
}
